//! Request governance service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ request id ─▶ latency timer ─▶ CORS / origin guard ─▶ rate limiter ─┐
//!                                                                                         │
//!                                         ┌── counter store (Redis / memory) ◀───────────┤
//!                                         │                                               ▼
//!     Client Response                     │                       metrics context ─▶ application
//!     ◀────────────── access log ◀─ latency monitor (p95 alerts) ◀──────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{extract::Query, http::Method, routing::get, Json, Router};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use request_governance::config::load_config;
use request_governance::lifecycle::{wait_for_signal, Shutdown};
use request_governance::observability::{
    latency::{log_alert, AlertSink, MonotonicClock},
    logging::init_logging,
    metrics::init_metrics,
    request_context,
};
use request_governance::security::counter_store::store_from_config;
use request_governance::{Governance, GovernanceServer};

#[derive(Parser)]
#[command(name = "request-governance")]
#[command(about = "Origin, rate limit and latency governance for HTTP services", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    init_logging(&config.observability);

    tracing::info!("request-governance v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        environment = %config.environment,
        rate_limits = config.rate_limits.len(),
        latency_rules = config.latency.rules.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = store_from_config(&config.store).await;
    let on_alert: AlertSink = Arc::new(log_alert);
    let governance = Governance::from_config(&config, store, on_alert, Arc::new(MonotonicClock::new()));

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = GovernanceServer::new(config, governance, demo_app());
    let server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    wait_for_signal().await;
    shutdown.trigger();
    server_task.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[derive(Deserialize)]
struct EchoParams {
    #[serde(default)]
    cached: bool,
}

/// Minimal application served behind the governance layers.
fn demo_app() -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "ok"})) }))
        .route(
            "/api/echo",
            get(|method: Method, Query(params): Query<EchoParams>| async move {
                request_context::record("echo", params.cached);
                Json::<Value>(json!({
                    "method": method.as_str(),
                    "cached": params.cached,
                }))
            }),
        )
}
