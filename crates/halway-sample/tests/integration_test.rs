use halway::blocking::BlockingClient;
use halway::mock::ManualClock;
use halway::CachingConfig;
use halway_sample::clients::SampleError;
use halway_sample::contracts::{Catalog, EntryPoint, Item};
use halway_sample::lifecycle::CatalogSystem;
use halway_sample::model::{CatalogStore, ItemState};
use std::sync::Arc;
use std::time::Duration;

fn system_with_clock() -> (CatalogSystem, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let system = CatalogSystem::with_clock(CatalogStore::sample(), CachingConfig::default(), clock.clone());
    (system, clock)
}

/// Navigates the whole api through transport, cache and server resources.
#[tokio::test]
async fn test_catalog_navigation() {
    let (system, _clock) = system_with_clock();
    let client = system.client();

    let catalog = client.catalog().await.expect("Failed to load catalog");
    assert_eq!(catalog.title, "Hardware");
    assert_eq!(catalog.size, 3);

    let items = client.items().await.expect("Failed to load items");
    let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["Hammer", "Nails", "Saw"]);

    let saw = client.item(3).await.expect("Failed to load item 3");
    assert_eq!(saw, ItemState { id: 3, name: "Saw".into(), price: 24.0 });

    let related = client.related(1).await.expect("Failed to load related items");
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].name, "Nails");

    let first = client.first_item().await.expect("Failed to load first item");
    assert_eq!(first.map(|i| i.id), Some(1));
}

#[tokio::test]
async fn test_missing_item() {
    let (system, _clock) = system_with_clock();
    let error = system.client().item(42).await.unwrap_err();
    assert!(matches!(error, SampleError::ItemNotFound(42)));
}

/// Clients share the cache, so a second client navigating the same way causes no requests
/// until the cached responses expire.
#[tokio::test]
async fn test_cache_is_shared_until_expiry() {
    let (system, clock) = system_with_clock();

    system.client().items().await.expect("Failed to load items");
    let requests = system.transport().request_count();
    assert_eq!(requests, 2);

    system.store().rename(1, "Sledgehammer");
    let cached = system.client().items().await.expect("Failed to load cached items");
    assert_eq!(cached[0].name, "Hammer");
    assert_eq!(system.transport().request_count(), requests);

    clock.advance(Duration::from_secs(61));
    let refreshed = system.client().items().await.expect("Failed to reload items");
    assert_eq!(refreshed[0].name, "Sledgehammer");
    assert_eq!(system.transport().request_count(), requests + 2);
}

#[tokio::test]
async fn test_client_metrics() {
    let (system, _clock) = system_with_clock();
    let client = system.client();
    client.items().await.expect("Failed to load items");

    let responses = client.metrics().source_responses();
    assert_eq!(responses.len(), 2);
    assert_eq!(client.metrics().response_max_age(), Some(Duration::from_secs(60)));

    let metadata = client.metrics().create_metadata_resource("/test");
    assert_eq!(metadata.property("maxAgeSeconds"), Some(&serde_json::json!(60)));
}

#[tokio::test]
async fn test_server_response_carries_metadata_and_max_age() {
    let (system, _clock) = system_with_clock();

    let response = system.serve("/catalog").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.max_age, Some(60));
    assert_eq!(response.body.embedded("metadata:debug").len(), 1);

    let missing = system.serve("/items/9").await;
    assert_eq!(missing.status, 404);
    assert_eq!(missing.content_type, halway::VND_ERROR_JSON);
}

#[test]
fn test_blocking_navigation() {
    let (system, _clock) = system_with_clock();
    let client = BlockingClient::from_client(system.client().hal_client().clone()).expect("Failed to create runtime");

    let entry = client.resolve::<EntryPoint>("/api").unwrap();
    let catalog = entry.required::<Catalog>("catalog").unwrap();
    let items = catalog.multiple::<Item>("item").unwrap();
    assert_eq!(items.len(), 3);

    let nails: ItemState = items[1].state().unwrap();
    assert_eq!(nails.name, "Nails");
}
