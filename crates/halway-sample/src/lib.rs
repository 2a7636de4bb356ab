//! # Halway Sample
//!
//! A small catalog api served and consumed with `halway`, in one process. It exposes the
//! modules for the demo binary and the integration tests.

pub mod clients;
pub mod contracts;
pub mod lifecycle;
pub mod model;
pub mod server;
pub mod transport;
