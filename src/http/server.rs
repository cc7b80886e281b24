//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the governance components from configuration
//! - Wrap the application router in the governance layers
//! - Bind server to listener and shut down gracefully
//!
//! # Layer order (outermost first)
//! ```text
//! request id → trace → request id propagation
//!     → latency (timing, alerts, access log)
//!     → CORS → origin guard → rate limit
//!     → request context → timeout → application
//! ```
//!
//! Timed-out requests still pass back through the latency layer as 408s.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::{setup_admin_router, AdminState};
use crate::config::GovernanceConfig;
use crate::http::middleware::{latency_middleware, request_context_middleware};
use crate::http::request::{MakeRequestUuidV4, X_REQUEST_ID};
use crate::observability::latency::{AlertSink, Clock, LatencyMonitor};
use crate::security::counter_store::CounterStore;
use crate::security::origin::{cors_layer, origin_guard_middleware, OriginPolicy};
use crate::security::rate_limit::{rate_limit_middleware, RateLimiters};

/// The governance components, built once and shared by all requests.
#[derive(Clone)]
pub struct Governance {
    pub origin: Arc<OriginPolicy>,
    pub rate_limits: Arc<RateLimiters>,
    pub latency: Arc<LatencyMonitor>,
}

impl Governance {
    pub fn from_config(
        config: &GovernanceConfig,
        store: Arc<dyn CounterStore>,
        on_alert: AlertSink,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            origin: Arc::new(OriginPolicy::from_config(
                config.environment,
                &config.origins.allowed,
            )),
            rate_limits: Arc::new(RateLimiters::from_config(
                &config.rate_limits,
                store,
                Duration::from_millis(config.store.timeout_ms),
            )),
            latency: Arc::new(LatencyMonitor::from_config(&config.latency, on_alert, clock)),
        }
    }

    /// Wrap `app` in the governance layers.
    pub fn apply(&self, app: Router) -> Router {
        app.layer(middleware::from_fn(request_context_middleware))
            .layer(middleware::from_fn_with_state(
                self.rate_limits.clone(),
                rate_limit_middleware,
            ))
            .layer(middleware::from_fn_with_state(
                self.origin.clone(),
                origin_guard_middleware,
            ))
            .layer(cors_layer(self.origin.clone()))
            .layer(middleware::from_fn_with_state(
                self.latency.clone(),
                latency_middleware,
            ))
    }
}

/// HTTP server fronted by the governance layer.
pub struct GovernanceServer {
    router: Router,
    admin: Option<Router>,
    config: GovernanceConfig,
}

impl GovernanceServer {
    /// Create a server serving `app` behind the governance layers.
    pub fn new(config: GovernanceConfig, governance: Governance, app: Router) -> Self {
        let admin = config.admin.enabled.then(|| {
            setup_admin_router(AdminState {
                api_key: config.admin.api_key.clone(),
                environment: config.environment,
                latency: governance.latency.clone(),
            })
        });
        let router = Self::build_router(&config, &governance, app);
        Self {
            router,
            admin,
            config,
        }
    }

    #[allow(deprecated)]
    fn build_router(config: &GovernanceConfig, governance: &Governance, app: Router) -> Router {
        let app = app.layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)));
        governance
            .apply(app)
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuidV4))
    }

    /// The fully layered router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        if let Some(admin) = self.admin {
            let admin_listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            let admin_shutdown = shutdown.resubscribe();
            tracing::info!(address = %self.config.admin.bind_address, "Admin API starting");
            tokio::spawn(async move {
                if let Err(e) = axum::serve(admin_listener, admin)
                    .with_graceful_shutdown(wait(admin_shutdown))
                    .await
                {
                    tracing::error!(error = %e, "Admin API failed");
                }
            });
        }

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(wait(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn wait(mut shutdown: broadcast::Receiver<()>) {
    let _ = shutdown.recv().await;
}
