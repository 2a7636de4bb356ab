//! # In-Process Transport
//!
//! An [`HttpTransport`] that answers requests by rendering the server resources directly,
//! without a socket in between. Responses go through the same callbacks a real HTTP
//! client would fire: headers first, then the serialized body.
//!
//! `GET /` is redirected to the entry point.

use crate::contracts::ENTRY_POINT;
use crate::model::CatalogStore;
use crate::server::route;
use halway::{
    HalResponseRenderer, HttpCallback, HttpHeaders, HttpTransport, JsonCodec, RenderConfig, SerdeJsonCodec, VndErrorRenderer,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn, Instrument};

pub struct InProcessTransport {
    store: Arc<CatalogStore>,
    config: RenderConfig,
    codec: Arc<dyn JsonCodec>,
    requests: AtomicUsize,
}

impl InProcessTransport {
    pub fn new(store: Arc<CatalogStore>, config: RenderConfig) -> Self {
        Self::with_codec(store, config, Arc::new(SerdeJsonCodec))
    }

    /// A transport encoding response bodies with `codec`.
    pub fn with_codec(store: Arc<CatalogStore>, config: RenderConfig, codec: Arc<dyn JsonCodec>) -> Self {
        Self {
            store,
            config,
            codec,
            requests: AtomicUsize::new(0),
        }
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl HttpTransport for InProcessTransport {
    fn execute_get(&self, uri: &str, callback: Arc<dyn HttpCallback>) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(uri, "No runtime to serve the request on");
                callback.on_exception_caught(Box::new(e));
                return;
            }
        };
        let store = self.store.clone();
        let config = self.config.clone();
        let codec = self.codec.clone();
        let uri = uri.to_string();
        let span = tracing::debug_span!("serve", uri = %uri);
        runtime.spawn(async move { serve(store, config, codec, uri, callback).await }.instrument(span));
    }
}

async fn serve(
    store: Arc<CatalogStore>,
    config: RenderConfig,
    codec: Arc<dyn JsonCodec>,
    uri: String,
    callback: Arc<dyn HttpCallback>,
) {
    let path = if uri == "/" {
        callback.on_url_modified(ENTRY_POINT);
        ENTRY_POINT.to_string()
    } else {
        uri
    };

    let response = match route(&path, &store) {
        Ok(resource) => {
            HalResponseRenderer::new(config)
                .render_response(&path, resource)
                .await
        }
        Err(error) => VndErrorRenderer::default().render(&path, &error),
    };

    let body = match codec.encode(&response.body.to_value()) {
        Ok(body) => body,
        Err(e) => {
            callback.on_exception_caught(Box::new(e));
            return;
        }
    };

    let mut headers = HttpHeaders::new();
    headers.insert("content-type".into(), vec![response.content_type.clone()]);
    if let Some(cache_control) = response.cache_control() {
        headers.insert("cache-control".into(), vec![cache_control]);
    }
    if response.is_success() {
        debug!(path = %path, status = response.status, bytes = body.len(), "Serving");
    } else {
        debug!(path = %path, status = response.status, "Serving error document");
    }
    callback.on_headers_available(response.status, &headers);
    callback.on_body_available(Box::new(Cursor::new(body)));
}
