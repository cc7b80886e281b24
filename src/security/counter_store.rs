//! Shared counter stores backing the sliding-window rate limiter.
//!
//! A store executes one window batch per evaluation, in order:
//!
//! 1. drop entries scored before the window start
//! 2. count what remains
//! 3. add the current request `(now, member)`
//! 4. refresh the key's expiry to the window length
//!
//! The count returned is the one taken before the insert. The batch is ordered but
//! not atomic against concurrent batches on the same key, so simultaneous requests
//! may both see a count below the limit. That overshoot is bounded by the number of
//! in-flight requests and accepted in exchange for a single round trip.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use redis::aio::ConnectionManager;

use crate::config::StoreConfig;

/// Sweep idle in-memory keys every this many evaluations.
const MEMORY_SWEEP_INTERVAL: u64 = 1024;

/// Errors raised by a counter store. The rate limiter treats all of them as
/// "store unavailable" and fails open.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("counter store timed out after {0:?}")]
    Timeout(Duration),
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// One sliding-window evaluation against a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowBatch {
    pub key: String,
    /// Entries scored strictly below this are purged.
    pub window_start_ms: u64,
    pub now_ms: u64,
    /// Unique member inserted for this request.
    pub member: String,
    pub ttl_secs: u64,
}

/// A counter store shared by every instance of the service.
pub trait CounterStore: Send + Sync {
    /// Run the four-step batch and return the count of prior entries in the window.
    fn record_and_count<'a>(&'a self, batch: &'a WindowBatch) -> BoxFuture<'a, Result<u64, StoreError>>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Redis sorted-set store. Scores are millisecond timestamps.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl RedisCounterStore {
    /// Connect to Redis, giving up after `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(timeout))??;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

/// The four-command batch for one evaluation. Only the `ZCARD` reply is kept.
pub fn window_pipeline(batch: &WindowBatch) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.cmd("ZREMRANGEBYSCORE")
        .arg(&batch.key)
        .arg("-inf")
        .arg(format!("({}", batch.window_start_ms))
        .ignore()
        .cmd("ZCARD")
        .arg(&batch.key)
        .cmd("ZADD")
        .arg(&batch.key)
        .arg(batch.now_ms)
        .arg(&batch.member)
        .ignore()
        .cmd("EXPIRE")
        .arg(&batch.key)
        .arg(batch.ttl_secs)
        .ignore();
    pipe
}

impl CounterStore for RedisCounterStore {
    fn record_and_count<'a>(&'a self, batch: &'a WindowBatch) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let (count,): (u64,) = window_pipeline(batch).query_async(&mut conn).await?;
            Ok(count)
        })
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[derive(Debug, Default)]
struct MemoryWindow {
    /// `(score, member)` in insertion order.
    entries: Vec<(u64, String)>,
    expires_at_ms: u64,
}

/// Process-local store with the same semantics as [`RedisCounterStore`].
///
/// Counts are not shared between instances; use it for single-instance
/// deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    windows: DashMap<String, MemoryWindow>,
    evaluations: AtomicU64,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Remove keys whose expiry has passed.
    pub fn purge_expired(&self, now_ms: u64) {
        self.windows.retain(|_, window| window.expires_at_ms > now_ms);
    }

    fn apply(&self, batch: &WindowBatch) -> u64 {
        let count = {
            let mut window = self.windows.entry(batch.key.clone()).or_default();
            if window.expires_at_ms <= batch.now_ms {
                window.entries.clear();
            }
            window
                .entries
                .retain(|(score, _)| *score >= batch.window_start_ms);
            let count = window.entries.len() as u64;
            window.entries.push((batch.now_ms, batch.member.clone()));
            window.expires_at_ms = batch.now_ms.saturating_add(batch.ttl_secs.saturating_mul(1000));
            count
        };

        if self.evaluations.fetch_add(1, Ordering::Relaxed) % MEMORY_SWEEP_INTERVAL
            == MEMORY_SWEEP_INTERVAL - 1
        {
            self.purge_expired(batch.now_ms);
        }
        count
    }
}

impl CounterStore for MemoryCounterStore {
    fn record_and_count<'a>(&'a self, batch: &'a WindowBatch) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move { Ok(self.apply(batch)) })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Build the store described by `config`.
///
/// Without a Redis URL, or when Redis cannot be reached at startup, counters are
/// kept in process memory so the service still starts and still limits per instance.
pub async fn store_from_config(config: &StoreConfig) -> Arc<dyn CounterStore> {
    let Some(url) = config.redis_url.as_deref() else {
        tracing::info!("No Redis URL configured, using in-memory rate limit counters");
        return Arc::new(MemoryCounterStore::new());
    };

    match RedisCounterStore::connect(url, Duration::from_millis(config.connect_timeout_ms)).await {
        Ok(store) => {
            tracing::info!("Connected to Redis rate limit store");
            Arc::new(store)
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                "Redis unavailable at startup, falling back to in-memory rate limit counters"
            );
            Arc::new(MemoryCounterStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(key: &str, now_ms: u64, window_secs: u64, member: &str) -> WindowBatch {
        WindowBatch {
            key: key.into(),
            window_start_ms: now_ms.saturating_sub(window_secs * 1000),
            now_ms,
            member: member.into(),
            ttl_secs: window_secs,
        }
    }

    #[tokio::test]
    async fn test_memory_counts_prior_entries() {
        let store = MemoryCounterStore::new();
        let base = 1_000_000;

        assert_eq!(store.record_and_count(&batch("k", base, 10, "a")).await.unwrap(), 0);
        assert_eq!(store.record_and_count(&batch("k", base + 1, 10, "b")).await.unwrap(), 1);
        assert_eq!(store.record_and_count(&batch("k", base + 2, 10, "c")).await.unwrap(), 2);
        assert_eq!(store.record_and_count(&batch("other", base + 2, 10, "d")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_purges_entries_outside_window() {
        let store = MemoryCounterStore::new();
        let base = 1_000_000;

        store.record_and_count(&batch("k", base, 10, "a")).await.unwrap();
        store.record_and_count(&batch("k", base + 5_000, 10, "b")).await.unwrap();

        // "a" is now older than the window start; "b" is still inside.
        let count = store
            .record_and_count(&batch("k", base + 10_001, 10, "c"))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    fn resp(args: &[&str]) -> String {
        let mut out = format!("*{}\r\n", args.len());
        for arg in args {
            out.push_str(&format!("${}\r\n{}\r\n", arg.len(), arg));
        }
        out
    }

    #[test]
    fn test_window_pipeline_commands() {
        let batch = WindowBatch {
            key: "ratelimit:api:1.2.3.4".into(),
            window_start_ms: 1_700_000_000_000,
            now_ms: 1_700_000_060_000,
            member: "1700000060000-00000000000000ff".into(),
            ttl_secs: 60,
        };

        let packed = window_pipeline(&batch).get_packed_pipeline();
        let expected = [
            resp(&["ZREMRANGEBYSCORE", "ratelimit:api:1.2.3.4", "-inf", "(1700000000000"]),
            resp(&["ZCARD", "ratelimit:api:1.2.3.4"]),
            resp(&["ZADD", "ratelimit:api:1.2.3.4", "1700000060000", "1700000060000-00000000000000ff"]),
            resp(&["EXPIRE", "ratelimit:api:1.2.3.4", "60"]),
        ]
        .concat();
        assert_eq!(String::from_utf8(packed).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_store_from_config_without_redis_is_memory() {
        let store = store_from_config(&StoreConfig::default()).await;
        assert_eq!(store.name(), "memory");
    }

    #[tokio::test]
    async fn test_memory_keys_expire_after_idle_window() {
        let store = MemoryCounterStore::new();
        store.record_and_count(&batch("k", 1_000, 2, "a")).await.unwrap();
        assert_eq!(store.len(), 1);

        store.purge_expired(2_999);
        assert_eq!(store.len(), 1);

        store.purge_expired(3_000);
        assert!(store.is_empty());
    }
}
