//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{routing::get, Router};
use futures_util::future::BoxFuture;
use tokio::net::TcpListener;

use request_governance::config::GovernanceConfig;
use request_governance::observability::latency::{AlertSink, Clock, LatencyAlert, MonotonicClock};
use request_governance::observability::request_context;
use request_governance::security::counter_store::{CounterStore, MemoryCounterStore, StoreError, WindowBatch};
use request_governance::{Governance, GovernanceServer, Shutdown};

/// Store that always reports the backend as unreachable.
pub struct UnreachableStore;

impl CounterStore for UnreachableStore {
    fn record_and_count<'a>(&'a self, _batch: &'a WindowBatch) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async { Err(StoreError::Unavailable("connection refused".into())) })
    }

    fn name(&self) -> &'static str {
        "unreachable"
    }
}

/// Store that answers after `delay`.
pub struct SlowStore {
    pub delay: Duration,
    pub inner: MemoryCounterStore,
}

impl CounterStore for SlowStore {
    fn record_and_count<'a>(&'a self, batch: &'a WindowBatch) -> BoxFuture<'a, Result<u64, StoreError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.record_and_count(batch).await
        })
    }

    fn name(&self) -> &'static str {
        "slow"
    }
}

/// Sink collecting alerts for assertions.
pub fn collecting_sink() -> (AlertSink, Arc<Mutex<Vec<LatencyAlert>>>) {
    let alerts = Arc::new(Mutex::new(Vec::new()));
    let collected = alerts.clone();
    let sink: AlertSink = Arc::new(move |a: &LatencyAlert| collected.lock().unwrap().push(a.clone()));
    (sink, alerts)
}

/// Application used behind the governance layers in tests.
pub fn test_app() -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/ping", get(|| async { "pong" }))
        .route(
            "/api/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                "slow"
            }),
        )
        .route(
            "/api/cached",
            get(|| async {
                request_context::record("guilds", true);
                request_context::record("guilds", false);
                "cached"
            }),
        )
}

/// Start a governance server on `addr`. Returns the shutdown handle.
pub async fn start_server(
    addr: SocketAddr,
    config: GovernanceConfig,
    store: Arc<dyn CounterStore>,
    sink: AlertSink,
) -> Shutdown {
    start_server_with_clock(addr, config, store, sink, Arc::new(MonotonicClock::new())).await
}

pub async fn start_server_with_clock(
    addr: SocketAddr,
    mut config: GovernanceConfig,
    store: Arc<dyn CounterStore>,
    sink: AlertSink,
    clock: Arc<dyn Clock>,
) -> Shutdown {
    config.listener.bind_address = addr.to_string();
    config.observability.metrics_enabled = false;

    let governance = Governance::from_config(&config, store, sink, clock);
    let server = GovernanceServer::new(config, governance, test_app());
    let listener = TcpListener::bind(addr).await.unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
