//! The catalog domain: item and catalog states plus the in-memory store the server reads from.

pub mod catalog;

pub use catalog::*;
