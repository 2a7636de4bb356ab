//! # Response Cache
//!
//! [`CachingResourceLoader`] wraps any [`ResourceLoader`] and keeps fetched responses in a
//! [`CacheStore`] until their max-age runs out.
//!
//! # Caching Policy
//!
//! - Successful responses are cached with their own max-age, or the configured
//!   [`DefaultMaxAge`](crate::config::DefaultMaxAge) for their status.
//! - Failures are cached only if `cache_errors` is enabled and the effective max-age is
//!   positive. A cached failure is raised again on every hit.
//! - A max-age of zero is never cached.
//! - A stale entry counts as a miss: the upstream loader is called and the entry replaced.
//!
//! Freshness is judged by the injected [`Clock`], so tests can move time forward with
//! [`ManualClock`](crate::mock::ManualClock).

use crate::clock::{Clock, SystemClock};
use crate::config::CachingConfig;
use crate::error::ClientError;
use crate::loader::ResourceLoader;
use crate::model::HalResponse;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A stored response (or failure); replaced wholesale on refresh.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub uri: String,
    pub response: Result<HalResponse, ClientError>,
    pub fetched_at: DateTime<Utc>,
    pub max_age: u64,
}

impl CacheEntry {
    fn expires_at(&self) -> DateTime<Utc> {
        self.fetched_at
            .checked_add_signed(seconds(self.max_age))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }

    /// Whole seconds of freshness left.
    pub fn remaining(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.expires_at() - now).num_seconds()).unwrap_or(0)
    }

    /// The cached outcome with its max-age reduced to the remaining freshness.
    fn replay(&self, now: DateTime<Utc>) -> Result<HalResponse, ClientError> {
        let remaining = self.remaining(now);
        match &self.response {
            Ok(response) => Ok(response.clone().with_max_age(remaining)),
            Err(error) => Err(error.clone().max_age(remaining)),
        }
    }
}

fn seconds(seconds: u64) -> Duration {
    Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX).min(i64::MAX / 1_000))
}

/// Storage backend of the response cache.
pub trait CacheStore: Send + Sync {
    fn get(&self, uri: &str) -> Option<CacheEntry>;

    fn put(&self, entry: CacheEntry);
}

struct IdleEntry {
    entry: CacheEntry,
    last_access: DateTime<Utc>,
}

/// Bounded in-memory store with least-recently-used eviction and a time-to-idle limit.
pub struct InMemoryCacheStore {
    entries: Mutex<LruCache<String, IdleEntry>>,
    time_to_idle: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemoryCacheStore {
    pub fn new(config: &CachingConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(config.max_items).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            time_to_idle: seconds(config.time_to_idle_seconds),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for InMemoryCacheStore {
    fn get(&self, uri: &str) -> Option<CacheEntry> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let idle_since = entries.peek(uri)?.last_access;
        if now - idle_since > self.time_to_idle {
            debug!(uri, "Evicting idle cache entry");
            entries.pop(uri);
            return None;
        }
        let idle = entries.get_mut(uri)?;
        idle.last_access = now;
        Some(idle.entry.clone())
    }

    fn put(&self, entry: CacheEntry) {
        let last_access = self.clock.now();
        self.entries
            .lock()
            .put(entry.uri.clone(), IdleEntry { entry, last_access });
    }
}

type Fetch = BoxFuture<'static, Result<HalResponse, ClientError>>;

/// A coalesced upstream fetch. Only callers keep it alive; the map holds a weak reference.
struct InFlight {
    id: u64,
    fetch: WeakShared<Fetch>,
}

struct CacheInner {
    upstream: Arc<dyn ResourceLoader>,
    store: Arc<dyn CacheStore>,
    config: CachingConfig,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_flight: AtomicU64,
}

/// Removes the in-flight entry when its fetch completes or every caller has given up on it.
struct InFlightGuard {
    inner: Arc<CacheInner>,
    uri: String,
    id: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        if in_flight.get(&self.uri).is_some_and(|entry| entry.id == self.id) {
            in_flight.remove(&self.uri);
        }
    }
}

/// [`ResourceLoader`] that serves fresh responses from a [`CacheStore`].
#[derive(Clone)]
pub struct CachingResourceLoader {
    inner: Arc<CacheInner>,
}

impl CachingResourceLoader {
    /// Caches in an [`InMemoryCacheStore`] using wall-clock time.
    pub fn new(upstream: Arc<dyn ResourceLoader>, config: CachingConfig) -> Self {
        Self::with_clock(upstream, config, Arc::new(SystemClock))
    }

    pub fn with_clock(upstream: Arc<dyn ResourceLoader>, config: CachingConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(InMemoryCacheStore::new(&config, clock.clone()));
        Self::with_store(upstream, store, config, clock)
    }

    pub fn with_store(
        upstream: Arc<dyn ResourceLoader>,
        store: Arc<dyn CacheStore>,
        config: CachingConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                upstream,
                store,
                config,
                clock,
                in_flight: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(0),
            }),
        }
    }

    fn shared_load(&self, uri: &str) -> Shared<Fetch> {
        let mut in_flight = self.inner.in_flight.lock();
        if let Some(fetch) = in_flight.get(uri).and_then(|entry| entry.fetch.upgrade()) {
            debug!(uri, "Joining in-flight fetch");
            return fetch;
        }

        let guard = InFlightGuard {
            inner: self.inner.clone(),
            uri: uri.to_string(),
            id: self.inner.next_flight.fetch_add(1, Ordering::Relaxed),
        };
        let id = guard.id;
        let inner = self.inner.clone();
        let owned_uri = uri.to_string();
        let fetch = async move {
            let _guard = guard;
            inner.load(&owned_uri).await
        }
        .boxed()
        .shared();
        if let Some(weak) = fetch.downgrade() {
            in_flight.insert(uri.to_string(), InFlight { id, fetch: weak });
        }
        fetch
    }
}

impl CacheInner {
    async fn load(&self, uri: &str) -> Result<HalResponse, ClientError> {
        let result = self.upstream.fetch(uri).await;
        let defaults = &self.config.default_max_age;
        let max_age = match &result {
            Ok(response) => Some(response.max_age.unwrap_or_else(|| defaults.for_status(response.status))),
            Err(error) if self.config.cache_errors => error
                .max_age
                .or_else(|| error.status.map(|status| defaults.for_status(status))),
            Err(_) => None,
        };

        match max_age {
            Some(max_age) if max_age > 0 => {
                debug!(uri, max_age, ok = result.is_ok(), "Caching response");
                self.store.put(CacheEntry {
                    uri: uri.to_string(),
                    response: result.clone(),
                    fetched_at: self.clock.now(),
                    max_age,
                });
            }
            _ => debug!(uri, "Response not cacheable"),
        }
        result
    }
}

#[async_trait]
impl ResourceLoader for CachingResourceLoader {
    async fn fetch(&self, uri: &str) -> Result<HalResponse, ClientError> {
        let now = self.inner.clock.now();
        if let Some(entry) = self.inner.store.get(uri) {
            if entry.is_fresh(now) {
                debug!(uri, remaining = entry.remaining(now), "Cache hit");
                return entry.replay(now);
            }
            debug!(uri, "Cache entry is stale");
        }

        if self.inner.config.coalesce_in_flight {
            self.shared_load(uri).await
        } else {
            self.inner.load(uri).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ManualClock, MockLoader};
    use serde_json::json;
    use std::time::Duration as StdDuration;

    fn caching(upstream: &Arc<MockLoader>, config: CachingConfig, clock: &Arc<ManualClock>) -> CachingResourceLoader {
        CachingResourceLoader::with_clock(upstream.clone(), config, clock.clone())
    }

    #[tokio::test]
    async fn fresh_responses_are_served_from_the_cache() {
        let upstream = Arc::new(MockLoader::new());
        upstream.expect_fetch("/text").return_hal_with_max_age(json!({ "text": "foo" }), 60);
        let clock = Arc::new(ManualClock::new());
        let loader = caching(&upstream, CachingConfig::default(), &clock);

        let first = loader.fetch("/text").await.unwrap();
        clock.advance(StdDuration::from_secs(10));
        let second = loader.fetch("/text").await.unwrap();

        assert_eq!(second.body, first.body);
        assert_eq!(second.body.property("text"), Some(&json!("foo")));
        assert_eq!(second.max_age, Some(50));
        assert_eq!(upstream.fetch_count("/text"), 1);
    }

    #[tokio::test]
    async fn stale_entries_are_refetched_and_replaced() {
        let upstream = Arc::new(MockLoader::new());
        upstream
            .expect_fetch("/text")
            .return_hal_with_max_age(json!({ "text": "foo" }), 60)
            .return_hal_with_max_age(json!({ "text": "bar" }), 60);
        let clock = Arc::new(ManualClock::new());
        let loader = caching(&upstream, CachingConfig::default(), &clock);

        loader.fetch("/text").await.unwrap();
        clock.advance(StdDuration::from_secs(65));
        let refreshed = loader.fetch("/text").await.unwrap();
        assert_eq!(refreshed.body.property("text"), Some(&json!("bar")));

        let cached = loader.fetch("/text").await.unwrap();
        assert_eq!(cached.body.property("text"), Some(&json!("bar")));
        assert_eq!(upstream.fetch_count("/text"), 2);
    }

    #[tokio::test]
    async fn zero_max_age_disables_caching() {
        let upstream = Arc::new(MockLoader::new());
        upstream.expect_fetch("/volatile").return_hal_with_max_age(json!({}), 0);
        let clock = Arc::new(ManualClock::new());
        let loader = caching(&upstream, CachingConfig::default(), &clock);

        for _ in 0..3 {
            loader.fetch("/volatile").await.unwrap();
        }
        assert_eq!(upstream.fetch_count("/volatile"), 3);
    }

    #[tokio::test]
    async fn default_max_age_applies_when_the_response_has_none() {
        let upstream = Arc::new(MockLoader::new());
        upstream.expect_fetch("/plain").return_hal(json!({}));
        let clock = Arc::new(ManualClock::new());
        let mut config = CachingConfig::default();
        config.default_max_age.seconds = 30;
        let loader = caching(&upstream, config, &clock);

        loader.fetch("/plain").await.unwrap();
        clock.advance(StdDuration::from_secs(20));
        assert_eq!(loader.fetch("/plain").await.unwrap().max_age, Some(10));
        clock.advance(StdDuration::from_secs(15));
        loader.fetch("/plain").await.unwrap();
        assert_eq!(upstream.fetch_count("/plain"), 2);
    }

    #[tokio::test]
    async fn errors_are_not_cached_by_default() {
        let upstream = Arc::new(MockLoader::new());
        upstream
            .expect_fetch("/broken")
            .return_err(ClientError::with_status("/broken", 503).max_age(60));
        let clock = Arc::new(ManualClock::new());
        let loader = caching(&upstream, CachingConfig::default(), &clock);

        assert!(loader.fetch("/broken").await.is_err());
        assert!(loader.fetch("/broken").await.is_err());
        assert_eq!(upstream.fetch_count("/broken"), 2);
    }

    #[tokio::test]
    async fn cached_errors_are_raised_again_when_enabled() {
        let upstream = Arc::new(MockLoader::new());
        upstream
            .expect_fetch("/missing")
            .return_err(ClientError::with_status("/missing", 404));
        let clock = Arc::new(ManualClock::new());
        let mut config = CachingConfig::default();
        config.cache_errors = true;
        config.default_max_age.by_status.insert(404, 10);
        let loader = caching(&upstream, config, &clock);

        let first = loader.fetch("/missing").await.unwrap_err();
        let second = loader.fetch("/missing").await.unwrap_err();
        assert_eq!(first.status, Some(404));
        assert_eq!(second.status, Some(404));
        assert_eq!(upstream.fetch_count("/missing"), 1);
    }

    #[tokio::test]
    async fn errors_without_max_age_are_never_cached() {
        let upstream = Arc::new(MockLoader::new());
        upstream
            .expect_fetch("/offline")
            .return_err(ClientError::new("/offline", "connection refused"));
        let clock = Arc::new(ManualClock::new());
        let mut config = CachingConfig::default();
        config.cache_errors = true;
        let loader = caching(&upstream, config, &clock);

        assert!(loader.fetch("/offline").await.is_err());
        assert!(loader.fetch("/offline").await.is_err());
        assert_eq!(upstream.fetch_count("/offline"), 2);
    }

    #[tokio::test]
    async fn idle_entries_are_evicted() {
        let clock = Arc::new(ManualClock::new());
        let config = CachingConfig {
            time_to_idle_seconds: 5,
            ..CachingConfig::default()
        };
        let store = InMemoryCacheStore::new(&config, clock.clone());
        store.put(CacheEntry {
            uri: "/a".into(),
            response: Ok(HalResponse::ok("/a", Default::default())),
            fetched_at: clock.now(),
            max_age: 600,
        });

        clock.advance(StdDuration::from_secs(4));
        assert!(store.get("/a").is_some());
        clock.advance(StdDuration::from_secs(4));
        assert!(store.get("/a").is_some());
        clock.advance(StdDuration::from_secs(6));
        assert!(store.get("/a").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn store_is_bounded_by_max_items() {
        let clock = Arc::new(ManualClock::new());
        let config = CachingConfig {
            max_items: 2,
            ..CachingConfig::default()
        };
        let store = InMemoryCacheStore::new(&config, clock.clone());
        for uri in ["/1", "/2", "/3"] {
            store.put(CacheEntry {
                uri: uri.into(),
                response: Ok(HalResponse::ok(uri, Default::default())),
                fetched_at: clock.now(),
                max_age: 60,
            });
        }
        assert_eq!(store.len(), 2);
        assert!(store.get("/1").is_none());
        assert!(store.get("/3").is_some());
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_fetch_when_coalescing() {
        let upstream = Arc::new(MockLoader::new());
        upstream
            .expect_fetch("/slow")
            .delay(StdDuration::from_millis(50))
            .return_hal_with_max_age(json!({ "slow": true }), 60);
        let clock = Arc::new(ManualClock::new());
        let config = CachingConfig {
            coalesce_in_flight: true,
            ..CachingConfig::default()
        };
        let loader = caching(&upstream, config, &clock);

        let (a, b) = tokio::join!(loader.fetch("/slow"), loader.fetch("/slow"));
        assert_eq!(a.unwrap().body, b.unwrap().body);
        assert_eq!(upstream.fetch_count("/slow"), 1);
        assert!(loader.inner.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn abandoned_coalesced_fetches_are_forgotten() {
        let upstream = Arc::new(MockLoader::new());
        upstream
            .expect_fetch("/slow")
            .delay(StdDuration::from_millis(50))
            .return_hal_with_max_age(json!({ "slow": true }), 60);
        let clock = Arc::new(ManualClock::new());
        let config = CachingConfig {
            coalesce_in_flight: true,
            ..CachingConfig::default()
        };
        let loader = caching(&upstream, config, &clock);

        let timed_out = tokio::time::timeout(StdDuration::from_millis(5), loader.fetch("/slow")).await;
        assert!(timed_out.is_err());
        assert!(loader.inner.in_flight.lock().is_empty());

        let response = loader.fetch("/slow").await.unwrap();
        assert_eq!(response.body.property("slow"), Some(&json!(true)));
        assert_eq!(upstream.fetch_count("/slow"), 2);
    }
}
