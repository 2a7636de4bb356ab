//! Error types of the catalog client.

use halway::HalError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SampleError {
    /// The requested item does not exist on the server.
    #[error("Item not found: {0}")]
    ItemNotFound(u32),

    /// The api does not offer a relation the client relies on.
    #[error("The api does not provide '{0}'")]
    MissingRelation(&'static str),

    #[error(transparent)]
    Hal(#[from] HalError),
}

impl SampleError {
    /// Maps a 404 of the item to [`SampleError::ItemNotFound`].
    pub(crate) fn for_item(id: u32, error: HalError) -> Self {
        match error.status() {
            Some(404) => SampleError::ItemNotFound(id),
            _ => SampleError::Hal(error),
        }
    }
}
