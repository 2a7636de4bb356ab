//! # Error Responses
//!
//! Any error reaching the top of a server render is turned into an
//! `application/vnd.error+json` document instead of failing the request. Which status the
//! response gets, and how loudly the error is logged, is decided by a chain of
//! [`ErrorStatusStrategy`] implementations: the first strategy with an opinion wins, and
//! [`DefaultErrorStrategy`] answers everything else.
//!
//! ```json
//! {
//!   "message": "GET /upstream failed with status 404",
//!   "status": 404,
//!   "_links": { "about": { "href": "/catalog" } },
//!   "_embedded": { "errors": [
//!     { "message": "...", "_links": { "about": { "href": "/upstream" } } }
//!   ] }
//! }
//! ```

use crate::error::HalError;
use crate::model::{HalResource, HalResponse, Link, VND_ERROR_JSON};
use serde_json::{json, Value};
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn, Level};

pub const ABOUT: &str = "about";
pub const ERRORS: &str = "errors";

/// Maps an error to a response status and a log severity.
pub trait ErrorStatusStrategy: Send + Sync {
    /// The HTTP status for `error`, `None` to defer to the next strategy.
    fn status_for(&self, error: &HalError) -> Option<u16>;

    /// The severity `error` is logged with, `None` to defer to the next strategy.
    fn log_level_for(&self, _error: &HalError) -> Option<Level> {
        None
    }
}

/// Fallback mapping used at the end of every chain.
///
/// | Error | Status | Level |
/// |-------|--------|-------|
/// | `Client` with upstream status | that status | WARN |
/// | `Client` without status | 502 | WARN |
/// | `Server` | its status | INFO below 500, ERROR otherwise |
/// | `Developer`, `Json`, `Internal` | 500 | ERROR |
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorStrategy;

impl ErrorStatusStrategy for DefaultErrorStrategy {
    fn status_for(&self, error: &HalError) -> Option<u16> {
        Some(match error {
            HalError::Client(e) => e.status.unwrap_or(502),
            HalError::Server { status, .. } => *status,
            HalError::Developer(_) | HalError::Json(_) | HalError::Internal(_) => 500,
        })
    }

    fn log_level_for(&self, error: &HalError) -> Option<Level> {
        Some(match error {
            HalError::Client(_) => Level::WARN,
            HalError::Server { status, .. } if *status < 500 => Level::INFO,
            _ => Level::ERROR,
        })
    }
}

/// Ordered strategies, consulted front to back.
#[derive(Clone, Default)]
pub struct ErrorStrategyChain {
    strategies: Vec<Arc<dyn ErrorStatusStrategy>>,
}

impl ErrorStrategyChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a strategy in front of the existing ones.
    pub fn prepend(mut self, strategy: impl ErrorStatusStrategy + 'static) -> Self {
        self.strategies.insert(0, Arc::new(strategy));
        self
    }

    pub fn status_for(&self, error: &HalError) -> u16 {
        self.strategies
            .iter()
            .find_map(|s| s.status_for(error))
            .or_else(|| DefaultErrorStrategy.status_for(error))
            .unwrap_or(500)
    }

    pub fn log_level_for(&self, error: &HalError) -> Level {
        self.strategies
            .iter()
            .find_map(|s| s.log_level_for(error))
            .or_else(|| DefaultErrorStrategy.log_level_for(error))
            .unwrap_or(Level::ERROR)
    }
}

/// Renders errors as `application/vnd.error+json` responses.
#[derive(Clone, Default)]
pub struct VndErrorRenderer {
    strategies: ErrorStrategyChain,
}

impl VndErrorRenderer {
    pub fn new(strategies: ErrorStrategyChain) -> Self {
        Self { strategies }
    }

    pub fn render(&self, request_uri: &str, error: &HalError) -> HalResponse {
        let status = self.strategies.status_for(error);
        log(self.strategies.log_level_for(error), request_uri, status, error);

        let mut body = HalResource::new();
        let _ = body.set_state(json!({
            "message": error.to_string(),
            "status": status,
        }));
        body.set_link(ABOUT, Link::new(request_uri));

        let errors = causes(error);
        if !errors.is_empty() {
            body.add_embedded(ERRORS, errors);
        }

        HalResponse {
            uri: request_uri.to_string(),
            status,
            content_type: VND_ERROR_JSON.to_string(),
            body,
            max_age: None,
        }
    }
}

/// The cause chain of `error`, followed by the upstream error body if there is one.
fn causes(error: &HalError) -> Vec<HalResource> {
    let mut errors = Vec::new();

    if let HalError::Client(client) = error {
        let mut upstream = HalResource::new();
        let _ = upstream.set_state(json!({
            "message": client.message,
            "status": client.status,
        }));
        upstream.set_link(ABOUT, Link::new(client.uri.clone()));
        errors.push(upstream);
    }

    let mut source = error.source();
    while let Some(cause) = source {
        let mut entry = HalResource::new();
        let _ = entry.set_state(json!({ "message": cause.to_string() }));
        errors.push(entry);
        source = cause.source();
    }

    if let HalError::Client(client) = error {
        if let Some(body @ Value::Object(_)) = &client.body {
            if let Ok(upstream_error) = HalResource::from_value(body.clone()) {
                errors.push(upstream_error);
            }
        }
    }
    errors
}

fn log(level: Level, uri: &str, status: u16, error: &HalError) {
    if level == Level::ERROR {
        error!(uri, status, error = %error, "Request failed");
    } else if level == Level::WARN {
        warn!(uri, status, error = %error, "Request failed");
    } else if level == Level::INFO {
        info!(uri, status, error = %error, "Request failed");
    } else if level == Level::DEBUG {
        debug!(uri, status, error = %error, "Request failed");
    } else {
        trace!(uri, status, error = %error, "Request failed");
    }
}
