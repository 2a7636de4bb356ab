//! Time source for cache freshness checks.

use chrono::{DateTime, Utc};

/// Injected clock, so tests can advance time deterministically
/// (see [`ManualClock`](crate::mock::ManualClock)).
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
