//! # Resource Loading
//!
//! The [`ResourceLoader`] SPI is what the client engine (through the response cache)
//! uses to fetch HAL documents. [`HttpResourceLoader`] is the default implementation on
//! top of a callback-style [`HttpTransport`]: the transport reports a response through an
//! [`HttpCallback`], and the loader turns those callbacks into exactly one result.
//!
//! Timeouts and cancellation are the transport's business; no retries happen here.

use crate::error::ClientError;
use crate::model::{HalResource, HalResponse, HAL_JSON};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::io::Read;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Fetches HAL documents by uri.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn fetch(&self, uri: &str) -> Result<HalResponse, ClientError>;
}

/// JSON encoding and decoding, injected wherever bodies are (de)serialized.
pub trait JsonCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Value, serde_json::Error>;

    fn encode(&self, value: &Value) -> Result<Vec<u8>, serde_json::Error>;
}

/// [`JsonCodec`] backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerdeJsonCodec;

impl JsonCodec for SerdeJsonCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(value)
    }
}

/// Response headers. Transports may use any case; the loader lower-cases names on arrival.
pub type HttpHeaders = BTreeMap<String, Vec<String>>;

/// Receives the outcome of one HTTP request.
///
/// A transport calls `on_url_modified` (optional, for redirects), then
/// `on_headers_available` followed by `on_body_available`, or `on_exception_caught`
/// if the request failed. Only the first terminal call has an effect.
pub trait HttpCallback: Send + Sync {
    fn on_url_modified(&self, uri: &str);

    fn on_headers_available(&self, status: u16, headers: &HttpHeaders);

    fn on_body_available(&self, body: Box<dyn Read + Send>);

    fn on_exception_caught(&self, error: Box<dyn Error + Send + Sync>);
}

/// A callback-style HTTP client.
pub trait HttpTransport: Send + Sync {
    /// Starts a GET request for `uri`; the result is reported to `callback`.
    fn execute_get(&self, uri: &str, callback: Arc<dyn HttpCallback>);
}

/// [`ResourceLoader`] on top of an [`HttpTransport`].
pub struct HttpResourceLoader {
    transport: Arc<dyn HttpTransport>,
    codec: Arc<dyn JsonCodec>,
}

impl HttpResourceLoader {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_codec(transport, Arc::new(SerdeJsonCodec))
    }

    pub fn with_codec(transport: Arc<dyn HttpTransport>, codec: Arc<dyn JsonCodec>) -> Self {
        Self { transport, codec }
    }
}

#[async_trait]
impl ResourceLoader for HttpResourceLoader {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, uri: &str) -> Result<HalResponse, ClientError> {
        let (respond_to, response) = oneshot::channel();
        let callback = Arc::new(ResponseCallback::new(uri, respond_to, self.codec.clone()));
        self.transport.execute_get(uri, callback);
        response.await.map_err(|_| {
            ClientError::new(uri, format!("GET {uri} ended without a response or error"))
        })?
    }
}

type Respond = oneshot::Sender<Result<HalResponse, ClientError>>;

struct ResponseCallback {
    uri: Mutex<String>,
    head: Mutex<Option<(u16, HttpHeaders)>>,
    respond_to: Mutex<Option<Respond>>,
    codec: Arc<dyn JsonCodec>,
}

impl ResponseCallback {
    fn new(uri: &str, respond_to: Respond, codec: Arc<dyn JsonCodec>) -> Self {
        Self {
            uri: Mutex::new(uri.to_string()),
            head: Mutex::new(None),
            respond_to: Mutex::new(Some(respond_to)),
            codec,
        }
    }

    fn uri(&self) -> String {
        self.uri.lock().clone()
    }

    /// Emits the terminal result; later calls are ignored.
    fn complete(&self, result: Result<HalResponse, ClientError>) {
        match self.respond_to.lock().take() {
            Some(respond_to) => {
                let _ = respond_to.send(result);
            }
            None => warn!(uri = %self.uri(), "Ignoring callback after the request completed"),
        }
    }

    fn to_response(&self, status: u16, headers: &HttpHeaders, bytes: &[u8]) -> Result<HalResponse, ClientError> {
        let uri = self.uri();
        let max_age = max_age(headers);
        let parsed = self.codec.decode(bytes);

        if status >= 400 {
            let mut error = ClientError::with_status(uri, status);
            error.body = parsed.ok();
            error.max_age = max_age;
            return Err(error);
        }

        let body = parsed
            .map_err(|e| {
                ClientError::new(uri.clone(), format!("failed to parse the body of {uri} as JSON"))
                    .caused_by(e)
            })
            .and_then(|value| {
                HalResource::from_value(value).map_err(|_| {
                    ClientError::new(uri.clone(), format!("the body of {uri} is not a JSON object"))
                })
            })
            .map_err(|mut e| {
                e.status = Some(status);
                e
            })?;

        Ok(HalResponse {
            content_type: header(headers, "content-type").unwrap_or(HAL_JSON).to_string(),
            status,
            body,
            max_age,
            uri,
        })
    }
}

impl HttpCallback for ResponseCallback {
    fn on_url_modified(&self, uri: &str) {
        debug!(from = %self.uri(), to = uri, "Redirected");
        *self.uri.lock() = uri.to_string();
    }

    fn on_headers_available(&self, status: u16, headers: &HttpHeaders) {
        debug!(uri = %self.uri(), status, "Headers available");
        let mut normalized = HttpHeaders::new();
        for (name, values) in headers {
            normalized
                .entry(name.to_ascii_lowercase())
                .or_default()
                .extend(values.iter().cloned());
        }
        *self.head.lock() = Some((status, normalized));
    }

    fn on_body_available(&self, mut body: Box<dyn Read + Send>) {
        let Some((status, headers)) = self.head.lock().clone() else {
            let uri = self.uri();
            self.complete(Err(ClientError::new(
                uri.clone(),
                format!("the transport delivered a body for {uri} before any headers"),
            )));
            return;
        };
        let mut bytes = Vec::new();
        let result = match body.read_to_end(&mut bytes) {
            Ok(_) => self.to_response(status, &headers, &bytes),
            Err(e) => {
                let uri = self.uri();
                Err(ClientError::new(uri.clone(), format!("failed to read the body of {uri}"))
                    .caused_by(e))
            }
        };
        self.complete(result);
    }

    fn on_exception_caught(&self, error: Box<dyn Error + Send + Sync>) {
        let uri = self.uri();
        let mut client_error = ClientError::new(uri.clone(), format!("GET {uri} failed: {error}"));
        client_error.status = self.head.lock().as_ref().map(|(status, _)| *status);
        client_error.cause = Some(Arc::from(error));
        self.complete(Err(client_error));
    }
}

fn header<'a>(headers: &'a HttpHeaders, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|values| values.first())
        .map(String::as_str)
}

/// Max-age from the `Cache-Control` header; `no-store` and `no-cache` count as zero.
pub fn max_age(headers: &HttpHeaders) -> Option<u64> {
    let values = headers.get("cache-control")?;
    let directives = values
        .iter()
        .flat_map(|v| v.split(','))
        .map(|d| d.trim().to_ascii_lowercase());
    let mut max_age = None;
    for directive in directives {
        if directive == "no-store" || directive == "no-cache" {
            return Some(0);
        }
        if let Some(seconds) = directive.strip_prefix("max-age=") {
            max_age = seconds.trim_matches('"').parse().ok().or(max_age);
        }
    }
    max_age
}
