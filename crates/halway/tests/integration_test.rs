use halway::mock::{create_mock_transport, expect_request, respond_json, ManualClock, MockLoader};
use halway::{
    CachingConfig, CachingResourceLoader, ContractBuilder, HalClient, HalContract, HttpResourceLoader,
    RequestMetrics, ResourceLoader,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// --- Test Contracts ---

struct Shelf;
struct Book;

impl HalContract for Shelf {
    fn declare(contract: &mut ContractBuilder) {
        contract
            .state()
            .relation::<Vec<Book>>("book")
            .relation::<Option<Book>>("favourite")
            .relation::<Book>("newest");
    }
}

impl HalContract for Book {
    fn declare(contract: &mut ContractBuilder) {
        contract.state().relation::<Shelf>("shelf");
    }
}

#[derive(Debug, Deserialize, PartialEq)]
struct Text {
    text: String,
}

fn cached_client(upstream: &Arc<MockLoader>, clock: &Arc<ManualClock>) -> HalClient {
    let caching = CachingResourceLoader::with_clock(upstream.clone(), CachingConfig::default(), clock.clone());
    HalClient::new(Arc::new(caching))
}

#[tokio::test]
async fn cached_response_is_reused_within_max_age() {
    let upstream = Arc::new(MockLoader::new());
    upstream
        .expect_fetch("/shelf")
        .return_hal_with_max_age(json!({ "text": "foo" }), 60);
    let clock = Arc::new(ManualClock::new());
    let client = cached_client(&upstream, &clock);

    let first: Text = client.resolve::<Shelf>("/shelf").unwrap().state().await.unwrap();
    clock.advance(Duration::from_secs(10));
    let second: Text = client.resolve::<Shelf>("/shelf").unwrap().state().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.text, "foo");
    assert_eq!(upstream.fetch_count("/shelf"), 1);
    upstream.verify();
}

#[tokio::test]
async fn expired_response_is_fetched_again() {
    let upstream = Arc::new(MockLoader::new());
    upstream
        .expect_fetch("/shelf")
        .return_hal_with_max_age(json!({ "text": "foo" }), 60)
        .return_hal_with_max_age(json!({ "text": "bar" }), 60);
    let clock = Arc::new(ManualClock::new());
    let client = cached_client(&upstream, &clock);

    let _: Text = client.resolve::<Shelf>("/shelf").unwrap().state().await.unwrap();
    clock.advance(Duration::from_secs(65));
    let refreshed: Text = client.resolve::<Shelf>("/shelf").unwrap().state().await.unwrap();

    assert_eq!(refreshed.text, "bar");
    assert_eq!(upstream.fetch_count("/shelf"), 2);
}

#[tokio::test]
async fn relations_resolve_through_the_cache() {
    let upstream = Arc::new(MockLoader::new());
    let books: Vec<_> = (0..10)
        .map(|i| json!({ "href": format!("/books/{i}") }))
        .collect();
    upstream.expect_fetch("/shelf").return_hal_with_max_age(
        json!({
            "text": "shelf",
            "_links": { "book": books, "newest": { "href": "/books/9" } }
        }),
        60,
    );
    upstream.expect_fetch("/books/9").return_err(halway::ClientError::with_status("/books/9", 404));
    let clock = Arc::new(ManualClock::new());
    let client = cached_client(&upstream, &clock);
    let shelf = client.resolve::<Shelf>("/shelf").unwrap();

    // zero-or-one without candidates
    assert!(shelf.follow::<Option<Book>>("favourite").await.unwrap().is_none());

    // zero-or-many in document order
    let books = shelf.follow::<Vec<Book>>("book").await.unwrap();
    assert_eq!(books.len(), 10);
    for (i, book) in books.iter().enumerate() {
        assert_eq!(book.uri(), format!("/books/{i}"));
    }

    // exactly-one whose target answers 404
    let newest = shelf.follow::<Book>("newest").await.unwrap();
    let error = newest.state::<Text>().await.unwrap_err();
    assert!(error.is_client_error());
    assert_eq!(error.status(), Some(404));

    assert_eq!(upstream.fetch_count("/shelf"), 1);
}

#[tokio::test]
async fn http_loader_feeds_the_cache_and_the_metrics() {
    let (transport, mut requests) = create_mock_transport();
    let http = Arc::new(HttpResourceLoader::new(transport));
    let caching: Arc<dyn ResourceLoader> = Arc::new(CachingResourceLoader::new(http, CachingConfig::default()));
    let metrics = Arc::new(RequestMetrics::new());
    let client = HalClient::new(caching).with_metrics(metrics.clone());

    let server = tokio::spawn(async move {
        let request = expect_request(&mut requests).await.expect("request");
        assert_eq!(request.uri, "/shelf");
        respond_json(
            &request,
            200,
            Some(120),
            &json!({ "text": "over http", "_links": { "self": { "href": "/shelf", "title": "Shelf" } } }),
        );
    });

    let shelf = client.resolve::<Shelf>("/shelf").unwrap();
    let state: Text = shelf.state().await.unwrap();
    server.await.unwrap();

    assert_eq!(state.text, "over http");
    let again: Text = client.resolve::<Shelf>("/shelf").unwrap().state().await.unwrap();
    assert_eq!(again.text, "over http");

    // the second response comes from the cache with the remaining max-age
    assert_eq!(metrics.source_responses().len(), 2);
    let max_age = metrics.response_max_age().unwrap().as_secs();
    assert!((119..=120).contains(&max_age));
}

#[test]
fn response_max_age_keeps_the_minimum() {
    let metrics = RequestMetrics::new();
    metrics.set_response_max_age(Duration::from_secs(55));
    metrics.set_response_max_age(Duration::from_secs(123));
    assert_eq!(metrics.response_max_age(), Some(Duration::from_secs(55)));

    let reversed = RequestMetrics::new();
    reversed.set_response_max_age(Duration::from_secs(123));
    reversed.set_response_max_age(Duration::from_secs(55));
    assert_eq!(reversed.response_max_age(), Some(Duration::from_secs(55)));
}
