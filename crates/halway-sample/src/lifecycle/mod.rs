//! # System Wiring
//!
//! [`CatalogSystem`] assembles the whole stack, server and client, inside one process:
//!
//! ```text
//! CatalogClient -> HalClient -> CachingResourceLoader -> HttpResourceLoader
//!                                                          -> InProcessTransport -> server resources
//! ```
//!
//! The cache is shared by every client the system creates; the metrics are not. Each call
//! to [`CatalogSystem::client`] starts a fresh [`RequestMetrics`], so every chain of
//! navigation can be inspected on its own.
//!
//! ```rust,ignore
//! let system = CatalogSystem::new(CatalogStore::sample());
//! let client = system.client();
//! let items = client.items().await?;
//! ```

use crate::clients::CatalogClient;
use crate::contracts::ENTRY_POINT;
use crate::model::CatalogStore;
use crate::server::route;
use crate::transport::InProcessTransport;
use halway::{
    CachingConfig, CachingResourceLoader, Clock, HalClient, HalResponse, HalResponseRenderer, HttpResourceLoader,
    JsonCodec, RenderConfig, RequestMetrics, ResourceLoader, SerdeJsonCodec, SystemClock, VndErrorRenderer,
};
use std::sync::Arc;
use tracing::info;

/// Render settings of the sample server.
pub fn render_config() -> RenderConfig {
    RenderConfig {
        metadata_enabled: true,
        max_age_cap_seconds: Some(60),
        ..RenderConfig::default()
    }
}

pub struct CatalogSystem {
    store: Arc<CatalogStore>,
    transport: Arc<InProcessTransport>,
    loader: Arc<dyn ResourceLoader>,
}

impl CatalogSystem {
    pub fn new(store: CatalogStore) -> Self {
        Self::with_clock(store, CachingConfig::default(), Arc::new(SystemClock))
    }

    /// Wires the system with an explicit cache configuration and time source.
    pub fn with_clock(store: CatalogStore, caching: CachingConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(store);
        let codec: Arc<dyn JsonCodec> = Arc::new(SerdeJsonCodec);
        let transport = Arc::new(InProcessTransport::with_codec(store.clone(), render_config(), codec.clone()));
        let http = Arc::new(HttpResourceLoader::with_codec(transport.clone(), codec));
        let loader = Arc::new(CachingResourceLoader::with_clock(http, caching, clock));
        info!(items = store.len(), "Catalog system ready");

        Self {
            store,
            transport,
            loader,
        }
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    pub fn transport(&self) -> &InProcessTransport {
        &self.transport
    }

    /// A client with its own metrics, sharing the system's cache.
    pub fn client(&self) -> CatalogClient {
        let client = HalClient::new(self.loader.clone()).with_metrics(Arc::new(RequestMetrics::new()));
        CatalogClient::new(client, ENTRY_POINT)
    }

    /// Renders `path` directly on the server side, bypassing transport and cache.
    pub async fn serve(&self, path: &str) -> HalResponse {
        match route(path, &self.store) {
            Ok(resource) => {
                HalResponseRenderer::new(render_config())
                    .render_response(path, resource)
                    .await
            }
            Err(error) => VndErrorRenderer::default().render(path, &error),
        }
    }
}
