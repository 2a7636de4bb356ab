//! # Engine Errors
//!
//! Every fallible operation in the engine returns [`HalError`]. The variants separate
//! the failures a caller may want to retry from the ones that indicate a bug:
//!
//! - [`HalError::Client`] - an upstream, network or parse failure ([`ClientError`]).
//! - [`HalError::Developer`] - the API was used incorrectly (missing required relation,
//!   unsupported relation shape, bad template binding, ...).
//! - [`HalError::Server`] - a resource implementation deliberately signals an HTTP status.

use serde_json::Value;
use std::error::Error;
use std::sync::Arc;

/// Failure to load a resource from upstream.
///
/// Cheap to clone so that failed responses can be cached and replayed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ClientError {
    pub message: String,
    /// HTTP status of the upstream response, `None` if no response was received.
    pub status: Option<u16>,
    pub uri: String,
    /// The upstream error body, if it could be parsed as JSON.
    pub body: Option<Value>,
    /// Max-age announced by the failed response.
    pub max_age: Option<u64>,
    #[source]
    pub cause: Option<Arc<dyn Error + Send + Sync>>,
}

impl ClientError {
    pub fn new(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            uri: uri.into(),
            body: None,
            max_age: None,
            cause: None,
        }
    }

    /// An upstream response with an error status.
    pub fn with_status(uri: impl Into<String>, status: u16) -> Self {
        let uri = uri.into();
        let message = format!("GET {uri} failed with status {status}");
        Self {
            status: Some(status),
            ..Self::new(uri, message)
        }
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn caused_by(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }
}

/// Errors raised by the capability model, the client resolver and the renderer.
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("Developer error: {0}")]
    Developer(String),
    #[error("{message}")]
    Server { status: u16, message: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Internal error: {0}")]
    Internal(Box<dyn Error + Send + Sync>),
}

impl HalError {
    pub fn developer(message: impl Into<String>) -> Self {
        HalError::Developer(message.into())
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        HalError::Server {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::server(404, message)
    }

    pub fn internal(error: impl Error + Send + Sync + 'static) -> Self {
        HalError::Internal(Box::new(error))
    }

    /// `true` if the remote side failed; such failures may be worth a retry.
    pub fn is_client_error(&self) -> bool {
        matches!(self, HalError::Client(_))
    }

    /// `true` if the calling code used the API incorrectly.
    pub fn is_developer_error(&self) -> bool {
        matches!(self, HalError::Developer(_))
    }

    /// Upstream status for client errors, declared status for server errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            HalError::Client(e) => e.status,
            HalError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_carries_status_and_uri() {
        let err = ClientError::with_status("/items/7", 404);
        assert_eq!(err.status, Some(404));
        assert_eq!(err.uri, "/items/7");
        assert!(err.to_string().contains("404"));
    }

    #[test]
    fn error_kinds_are_distinguishable() {
        let client: HalError = ClientError::new("/", "connection refused").into();
        assert!(client.is_client_error());
        assert!(!client.is_developer_error());

        let dev = HalError::developer("missing relation");
        assert!(dev.is_developer_error());
        assert_eq!(dev.status(), None);

        assert_eq!(HalError::not_found("gone").status(), Some(404));
    }

    #[test]
    fn cause_is_exposed_as_source() {
        let io = std::io::Error::other("reset by peer");
        let err = ClientError::new("/", "transport failed").caused_by(io);
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "reset by peer");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HalError>();
        assert_send_sync::<ClientError>();
    }
}
