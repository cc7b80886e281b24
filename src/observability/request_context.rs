//! Request-scoped cache metrics.
//!
//! Code deep inside a handler can call [`record`] without being handed any context:
//! the accumulator lives in a tokio task-local that [`run_with_context`] installs for
//! the duration of one request future. Concurrent requests run in separate scopes and
//! never see each other's counts. Outside a scope, [`record`] does nothing and
//! [`snapshot`] returns `None`.
//!
//! Futures passed to `tokio::spawn` run outside the scope unless they are wrapped in
//! [`run_with_context`] themselves.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;

use serde::Serialize;

/// Hit/miss counters of one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheCounts {
    pub hits: u64,
    pub misses: u64,
}

/// Counters per cache name, accumulated over one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CacheMetrics(BTreeMap<String, CacheCounts>);

impl CacheMetrics {
    pub fn record(&mut self, cache: &str, hit: bool) {
        let counts = self.0.entry(cache.to_string()).or_default();
        if hit {
            counts.hits += 1;
        } else {
            counts.misses += 1;
        }
    }

    pub fn get(&self, cache: &str) -> Option<CacheCounts> {
        self.0.get(cache).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, CacheCounts)> {
        self.0.iter().map(|(name, counts)| (name.as_str(), *counts))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

tokio::task_local! {
    static CACHE_METRICS: RefCell<CacheMetrics>;
}

/// Run `fut` with a fresh, empty accumulator.
pub async fn run_with_context<F: Future>(fut: F) -> F::Output {
    CACHE_METRICS
        .scope(RefCell::new(CacheMetrics::default()), fut)
        .await
}

/// Count a hit or miss for `cache` in the current request, if there is one.
pub fn record(cache: &str, hit: bool) {
    let _ = CACHE_METRICS.try_with(|metrics| metrics.borrow_mut().record(cache, hit));
}

/// Counters accumulated so far, or `None` outside a request scope.
pub fn snapshot() -> Option<CacheMetrics> {
    CACHE_METRICS.try_with(|metrics| metrics.borrow().clone()).ok()
}

/// Whether the caller runs inside a request scope.
pub fn is_active() -> bool {
    CACHE_METRICS.try_with(|_| ()).is_ok()
}
