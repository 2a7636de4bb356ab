//! Typed wrappers around [`HalClient`](halway::HalClient) for the catalog api.

pub mod catalog_client;
pub mod error;

pub use catalog_client::*;
pub use error::*;
