//! Failure injection tests: the counter store going away must never block traffic.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use request_governance::config::{GovernanceConfig, RateLimitPolicyConfig};
use request_governance::security::counter_store::MemoryCounterStore;

mod common;

fn strict_policy() -> RateLimitPolicyConfig {
    RateLimitPolicyConfig {
        name: "strict".into(),
        path_prefix: "/".into(),
        methods: vec![],
        window_secs: 60,
        max_requests: 1,
        key_prefix: "strict".into(),
        key: "ip".into(),
    }
}

#[tokio::test]
async fn test_unreachable_store_fails_open() {
    let addr: SocketAddr = "127.0.0.1:28501".parse().unwrap();
    let mut config = GovernanceConfig::default();
    config.rate_limits.push(strict_policy());

    let (sink, _) = common::collecting_sink();
    let shutdown = common::start_server(addr, config, Arc::new(common::UnreachableStore), sink).await;
    let client = common::client();

    for _ in 0..10 {
        let res = client.get(format!("http://{addr}/api/ping")).send().await.unwrap();
        assert_eq!(res.status(), 200, "store outage must not throttle");
        assert!(res.headers().get("x-ratelimit-limit").is_none());
    }

    shutdown.trigger();
}

#[tokio::test]
async fn test_stalled_store_fails_open_within_timeout() {
    let addr: SocketAddr = "127.0.0.1:28502".parse().unwrap();
    let mut config = GovernanceConfig::default();
    config.rate_limits.push(strict_policy());
    config.store.timeout_ms = 50;

    let store = common::SlowStore {
        delay: Duration::from_secs(5),
        inner: MemoryCounterStore::new(),
    };
    let (sink, _) = common::collecting_sink();
    let shutdown = common::start_server(addr, config, Arc::new(store), sink).await;
    let client = common::client();

    let start = Instant::now();
    for _ in 0..3 {
        let res = client.get(format!("http://{addr}/api/ping")).send().await.unwrap();
        assert_eq!(res.status(), 200);
    }
    assert!(start.elapsed() < Duration::from_secs(3), "requests waited on the store");

    shutdown.trigger();
}

#[tokio::test]
async fn test_recovering_store_enforces_again() {
    let addr: SocketAddr = "127.0.0.1:28503".parse().unwrap();
    let mut config = GovernanceConfig::default();
    config.rate_limits.push(strict_policy());
    config.store.timeout_ms = 1_000;

    // Slow but within the deadline: limits apply normally.
    let store = common::SlowStore {
        delay: Duration::from_millis(20),
        inner: MemoryCounterStore::new(),
    };
    let (sink, _) = common::collecting_sink();
    let shutdown = common::start_server(addr, config, Arc::new(store), sink).await;
    let client = common::client();

    let res = client.get(format!("http://{addr}/api/ping")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let res = client.get(format!("http://{addr}/api/ping")).send().await.unwrap();
    assert_eq!(res.status(), 429);

    shutdown.trigger();
}
