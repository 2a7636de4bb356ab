//! # Configuration
//!
//! Plain settings structs, injected into the components that use them. All of them
//! implement `Default` and can be deserialized (missing fields fall back to defaults).

use serde::Deserialize;
use std::collections::BTreeMap;

/// Max-age applied to responses that do not announce one.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DefaultMaxAge {
    pub seconds: u64,
    /// Per-status overrides, e.g. `{ "404": 10 }`.
    pub by_status: BTreeMap<u16, u64>,
}

impl Default for DefaultMaxAge {
    fn default() -> Self {
        Self {
            seconds: 60,
            by_status: BTreeMap::new(),
        }
    }
}

impl DefaultMaxAge {
    pub fn for_status(&self, status: u16) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(self.seconds)
    }
}

/// Settings of the response cache.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CachingConfig {
    /// Maximum number of cached responses.
    pub max_items: usize,
    /// Entries not read for this long are evicted.
    pub time_to_idle_seconds: u64,
    /// Cache failed responses as well (only if they have a max-age > 0).
    pub cache_errors: bool,
    /// Share one upstream call between concurrent misses for the same uri.
    pub coalesce_in_flight: bool,
    pub default_max_age: DefaultMaxAge,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            max_items: 10_000,
            time_to_idle_seconds: 3_600,
            cache_errors: false,
            coalesce_in_flight: false,
            default_max_age: DefaultMaxAge::default(),
        }
    }
}

/// How invocation times of the same method are combined in the metadata resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationAggregation {
    #[default]
    Sum,
    Max,
}

/// Settings of the server-side response renderer.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Embed the request metadata resource into every response.
    pub metadata_enabled: bool,
    pub invocation_aggregation: InvocationAggregation,
    /// Upper bound for the max-age of every rendered response.
    pub max_age_cap_seconds: Option<u64>,
}
