//! # Halway Sample
//!
//! Serves a catalog of items and navigates it with a typed client:
//!
//! - **contracts**: the `EntryPoint`, `Catalog` and `Item` contracts shared by both sides.
//! - **server**: resources rendering the contracts from a [`CatalogStore`].
//! - **clients**: `CatalogClient`, navigating by relation names.
//! - **lifecycle**: [`CatalogSystem`], which wires client, cache and server together.
//!
//! Run with `RUST_LOG=debug` to see every fetch and cache decision.

use halway::tracing::setup_tracing;
use halway_sample::lifecycle::CatalogSystem;
use halway_sample::model::CatalogStore;
use tracing::{error, info, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    info!("Starting catalog sample");
    let system = CatalogSystem::new(CatalogStore::sample());
    let client = system.client();

    let span = tracing::info_span!("browse_catalog");
    let items = async {
        let catalog = client.catalog().await.map_err(|e| e.to_string())?;
        info!(title = %catalog.title, size = catalog.size, "Catalog loaded");
        client.items().await.map_err(|e| e.to_string())
    }
    .instrument(span)
    .await?;

    for item in &items {
        info!(id = item.id, name = %item.name, price = item.price, "Item");
    }

    let span = tracing::info_span!("lookup");
    async {
        match client.related(1).await {
            Ok(related) => info!(count = related.len(), "Related items of item 1"),
            Err(e) => error!(error = %e, "Related lookup failed"),
        }
        match client.item(42).await {
            Ok(item) => info!(name = %item.name, "Unexpectedly found item 42"),
            Err(e) => info!(error = %e, "Lookup of item 42 failed as expected"),
        }
    }
    .instrument(span)
    .await;

    let metadata = client.metrics().create_metadata_resource("sample");
    info!(
        requests = client.metrics().source_responses().len(),
        upstream_requests = system.transport().request_count(),
        metadata = %metadata.to_value(),
        "Navigation finished"
    );
    Ok(())
}
