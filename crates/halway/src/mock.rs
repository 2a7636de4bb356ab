//! # Mock Framework & Testing Guide
//!
//! Test doubles for the engine's injection points, so client, cache and loader logic can
//! be tested without a network:
//!
//! | Double | Replaces | Use Case |
//! |--------|----------|----------|
//! | [`MockLoader`] | any [`ResourceLoader`] | Scripted responses per uri, fetch counting |
//! | [`create_mock_transport`] | an [`HttpTransport`] | Driving the HTTP callbacks by hand |
//! | [`ManualClock`] | [`SystemClock`](crate::clock::SystemClock) | Deterministic cache expiry |
//!
//! ## Testing Strategies
//!
//! <details>
//! <summary><b>Pattern 0: Scripted Loader (Pure Mock)</b></summary>
//!
//! **When to use**: Testing relation resolution or caching without any HTTP plumbing.
//!
//! ```rust,ignore
//! let loader = Arc::new(MockLoader::new());
//! loader
//!     .expect_fetch("/catalog")
//!     .return_hal(json!({ "_links": { "item": [{ "href": "/items/1" }] } }));
//!
//! let client = HalClient::new(loader.clone());
//! let catalog = client.resolve::<Catalog>("/catalog")?;
//! let items = catalog.follow::<Vec<Item>>("item").await?;
//!
//! assert_eq!(loader.fetch_count("/catalog"), 1);
//! loader.verify();
//! ```
//! </details>
//!
//! <details>
//! <summary><b>Pattern 1: Cache Expiry with a Manual Clock</b></summary>
//!
//! ```rust,ignore
//! let clock = Arc::new(ManualClock::new());
//! let loader = CachingResourceLoader::with_clock(upstream, CachingConfig::default(), clock.clone());
//! loader.fetch("/text").await?;
//! clock.advance(Duration::from_secs(65));
//! loader.fetch("/text").await?; // stale, fetched again
//! ```
//! </details>
//!
//! <details>
//! <summary><b>Pattern 2: Transport Callbacks</b></summary>
//!
//! **When to use**: Testing [`HttpResourceLoader`](crate::loader::HttpResourceLoader) or a
//! transport adapter. Requests arrive on a channel you control; answer them through the
//! callback in any order you like.
//!
//! ```rust,ignore
//! let (transport, mut requests) = create_mock_transport();
//! let loader = HttpResourceLoader::new(transport);
//! let fetch = tokio::spawn(async move { loader.fetch("/items/1").await });
//!
//! let request = expect_request(&mut requests).await.unwrap();
//! respond_json(&request, 200, Some(60), &json!({ "name": "One" }));
//! ```
//! </details>
//!
//! Unscripted uris answer with a 404 [`ClientError`] and make [`MockLoader::verify`] fail.

use crate::clock::Clock;
use crate::error::ClientError;
use crate::loader::{HttpCallback, HttpHeaders, HttpTransport, JsonCodec, ResourceLoader, SerdeJsonCodec};
use crate::model::{HalResource, HalResponse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// =============================================================================
// SCRIPTED LOADER
// =============================================================================

#[derive(Clone)]
struct Expectation {
    response: Result<HalResponse, ClientError>,
    delay: Option<Duration>,
}

#[derive(Default)]
struct Script {
    expectations: HashMap<String, VecDeque<Expectation>>,
    fetches: HashMap<String, usize>,
    unexpected: Vec<String>,
}

impl Script {
    /// Pops the next scripted answer; the last one repeats.
    fn next(&mut self, uri: &str) -> Option<Expectation> {
        let queue = self.expectations.get_mut(uri)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

/// A [`ResourceLoader`] answering from per-uri scripts.
///
/// # Example
/// ```ignore
/// let loader = MockLoader::new();
/// loader.expect_fetch("/a").return_hal(json!({ "n": 1 })).return_hal(json!({ "n": 2 }));
/// loader.expect_fetch("/b").return_err(ClientError::with_status("/b", 404));
/// ```
#[derive(Default)]
pub struct MockLoader {
    script: Arc<Mutex<Script>>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expects fetches of `uri`.
    pub fn expect_fetch(&self, uri: &str) -> FetchExpectationBuilder {
        FetchExpectationBuilder {
            uri: uri.to_string(),
            delay: None,
            script: self.script.clone(),
        }
    }

    /// How often `uri` was fetched.
    pub fn fetch_count(&self, uri: &str) -> usize {
        self.script.lock().fetches.get(uri).copied().unwrap_or(0)
    }

    /// Total number of fetches across all uris.
    pub fn total_fetches(&self) -> usize {
        self.script.lock().fetches.values().sum()
    }

    /// Verifies that every scripted uri was fetched and nothing else was.
    pub fn verify(&self) {
        let script = self.script.lock();
        if !script.unexpected.is_empty() {
            panic!("Unexpected fetches: {:?}", script.unexpected);
        }
        let mut unfetched: Vec<&String> = script
            .expectations
            .keys()
            .filter(|uri| !script.fetches.contains_key(*uri))
            .collect();
        unfetched.sort();
        if !unfetched.is_empty() {
            panic!("Not all expectations were met. Never fetched: {unfetched:?}");
        }
    }
}

#[async_trait]
impl ResourceLoader for MockLoader {
    async fn fetch(&self, uri: &str) -> Result<HalResponse, ClientError> {
        let expectation = {
            let mut script = self.script.lock();
            *script.fetches.entry(uri.to_string()).or_default() += 1;
            let next = script.next(uri);
            if next.is_none() {
                script.unexpected.push(uri.to_string());
            }
            next
        };

        let Some(expectation) = expectation else {
            return Err(ClientError::with_status(uri, 404));
        };
        if let Some(delay) = expectation.delay {
            tokio::time::sleep(delay).await;
        }
        expectation.response
    }
}

/// Builder for fetch expectations; each `return_*` call queues one answer.
pub struct FetchExpectationBuilder {
    uri: String,
    delay: Option<Duration>,
    script: Arc<Mutex<Script>>,
}

impl FetchExpectationBuilder {
    /// Delays the answers queued after this call.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn return_ok(self, response: HalResponse) -> Self {
        self.push(Ok(response))
    }

    /// Answers with a 200 HAL response; `body` must be a JSON object.
    pub fn return_hal(self, body: Value) -> Self {
        let response = HalResponse::ok(self.uri.clone(), hal(body));
        self.push(Ok(response))
    }

    pub fn return_hal_with_max_age(self, body: Value, max_age: u64) -> Self {
        let response = HalResponse::ok(self.uri.clone(), hal(body)).with_max_age(max_age);
        self.push(Ok(response))
    }

    pub fn return_err(self, error: ClientError) -> Self {
        self.push(Err(error))
    }

    fn push(self, response: Result<HalResponse, ClientError>) -> Self {
        self.script
            .lock()
            .expectations
            .entry(self.uri.clone())
            .or_default()
            .push_back(Expectation {
                response,
                delay: self.delay,
            });
        self
    }
}

fn hal(body: Value) -> HalResource {
    HalResource::from_value(body).unwrap_or_else(|e| panic!("Mock body is not a HAL document: {e}"))
}

// =============================================================================
// CLOCK
// =============================================================================

/// A [`Clock`] that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn advance(&self, by: Duration) {
        let millis = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        let mut now = self.now.lock();
        *now += chrono::Duration::milliseconds(millis);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// =============================================================================
// TRANSPORT HELPERS
// =============================================================================

/// A GET request captured by the mock transport.
pub struct TransportRequest {
    pub uri: String,
    pub callback: Arc<dyn HttpCallback>,
}

/// [`HttpTransport`] that forwards every request to a channel.
pub struct MockTransport {
    sender: mpsc::UnboundedSender<TransportRequest>,
}

impl HttpTransport for MockTransport {
    fn execute_get(&self, uri: &str, callback: Arc<dyn HttpCallback>) {
        let _ = self.sender.send(TransportRequest {
            uri: uri.to_string(),
            callback,
        });
    }
}

/// Creates a mock transport and a receiver for the requests it is asked to execute.
///
/// # Testing Strategy
/// The test plays the role of the HTTP client: it receives each request and decides
/// which callbacks fire, in which order and how often. This makes redirects, late
/// errors and double emissions easy to simulate.
pub fn create_mock_transport() -> (Arc<MockTransport>, mpsc::UnboundedReceiver<TransportRequest>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Arc::new(MockTransport { sender }), receiver)
}

/// Helper to wait for the next request sent to the mock transport.
pub async fn expect_request(
    receiver: &mut mpsc::UnboundedReceiver<TransportRequest>,
) -> Option<TransportRequest> {
    receiver.recv().await
}

/// Builds lower-case response headers.
pub fn headers(pairs: &[(&str, &str)]) -> HttpHeaders {
    let mut headers = HttpHeaders::new();
    for (name, value) in pairs {
        headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    headers
}

/// Answers `request` with a JSON body, optionally announcing a max-age.
pub fn respond_json(request: &TransportRequest, status: u16, max_age: Option<u64>, body: &Value) {
    respond_json_with(&SerdeJsonCodec, request, status, max_age, body);
}

/// Like [`respond_json`], encoding the body with `codec`.
pub fn respond_json_with(
    codec: &dyn JsonCodec,
    request: &TransportRequest,
    status: u16,
    max_age: Option<u64>,
    body: &Value,
) {
    let bytes = match codec.encode(body) {
        Ok(bytes) => bytes,
        Err(e) => {
            request.callback.on_exception_caught(Box::new(e));
            return;
        }
    };
    let mut headers = headers(&[("content-type", crate::model::HAL_JSON)]);
    if let Some(seconds) = max_age {
        headers.insert("cache-control".into(), vec![format!("max-age={seconds}")]);
    }
    request.callback.on_headers_available(status, &headers);
    request.callback.on_body_available(Box::new(Cursor::new(bytes)));
}
