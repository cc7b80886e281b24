//! Distributed sliding-window rate limiting.
//!
//! Each policy counts requests per subject in a trailing window held in a shared
//! [`CounterStore`]. If the store errors or does not answer within the configured
//! deadline the request is let through: availability wins over strict enforcement.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::validation::parse_method;
use crate::config::RateLimitPolicyConfig;
use crate::http::response::ApiError;
use crate::observability::metrics;
use crate::security::counter_store::{CounterStore, WindowBatch};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Subject used when the caller's address is unknown.
const UNKNOWN_SUBJECT: &str = "unknown";

type CustomExtractor = dyn Fn(&Request<Body>) -> Option<String> + Send + Sync;

/// How a request is mapped to the subject it is counted against.
#[derive(Clone, Default)]
pub enum KeyExtractor {
    /// Peer IP address.
    #[default]
    Ip,
    /// Value of a request header, e.g. an authenticated user id set upstream.
    Header(HeaderName),
    /// Caller-supplied function.
    Custom(Arc<CustomExtractor>),
}

impl KeyExtractor {
    /// Parse `ip` or `header:<name>`.
    pub fn from_spec(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        if spec.eq_ignore_ascii_case("ip") {
            return Some(KeyExtractor::Ip);
        }
        let (kind, name) = spec.split_once(':')?;
        if !kind.trim().eq_ignore_ascii_case("header") {
            return None;
        }
        HeaderName::from_bytes(name.trim().to_ascii_lowercase().as_bytes())
            .ok()
            .map(KeyExtractor::Header)
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Request<Body>) -> Option<String> + Send + Sync + 'static,
    {
        KeyExtractor::Custom(Arc::new(f))
    }

    /// Resolve the subject, falling back to the peer address and then `"unknown"`.
    pub fn subject(&self, request: &Request<Body>) -> String {
        let extracted = match self {
            KeyExtractor::Ip => None,
            KeyExtractor::Header(name) => request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_owned),
            KeyExtractor::Custom(f) => f(request),
        };

        extracted.unwrap_or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
                .unwrap_or_else(|| UNKNOWN_SUBJECT.to_string())
        })
    }
}

impl fmt::Debug for KeyExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyExtractor::Ip => f.write_str("Ip"),
            KeyExtractor::Header(name) => f.debug_tuple("Header").field(name).finish(),
            KeyExtractor::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One rate limit policy.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub name: String,
    pub path_prefix: String,
    /// Empty means every method.
    pub methods: Vec<Method>,
    pub window_secs: u64,
    pub max_requests: u64,
    pub key_prefix: String,
    pub key: KeyExtractor,
}

impl RateLimitPolicy {
    pub fn new(name: impl Into<String>, window_secs: u64, max_requests: u64, key_prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path_prefix: "/".to_string(),
            methods: Vec::new(),
            window_secs,
            max_requests,
            key_prefix: key_prefix.into(),
            key: KeyExtractor::Ip,
        }
    }

    pub fn from_config(config: &RateLimitPolicyConfig) -> Self {
        Self {
            name: config.name.clone(),
            path_prefix: config.path_prefix.clone(),
            methods: config.methods.iter().filter_map(|m| parse_method(m)).collect(),
            window_secs: config.window_secs,
            max_requests: config.max_requests,
            key_prefix: config.key_prefix.clone(),
            key: KeyExtractor::from_spec(&config.key).unwrap_or_default(),
        }
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = prefix.into();
        self
    }

    pub fn with_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn with_key(mut self, key: KeyExtractor) -> Self {
        self.key = key;
        self
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        path.starts_with(&self.path_prefix) && (self.methods.is_empty() || self.methods.contains(method))
    }

    /// Storage key for a subject: `ratelimit:<prefix>:<subject>`.
    pub fn window_key(&self, subject: &str) -> String {
        format!("ratelimit:{}:{}", self.key_prefix, subject)
    }
}

/// Result of evaluating one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitOutcome {
    Allowed {
        limit: u64,
        remaining: u64,
        reset_at_epoch_secs: u64,
    },
    Limited {
        limit: u64,
        retry_after_secs: u64,
        reset_at_epoch_secs: u64,
    },
    /// The store could not be consulted; the request proceeds unthrottled.
    Unenforced,
}

impl RateLimitOutcome {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, RateLimitOutcome::Limited { .. })
    }
}

/// A policy bound to a counter store.
pub struct RateLimiter {
    policy: RateLimitPolicy,
    store: Arc<dyn CounterStore>,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, store: Arc<dyn CounterStore>, store_timeout: Duration) -> Self {
        Self {
            policy,
            store,
            store_timeout,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Evaluate one request for `subject` at `now_ms` (milliseconds since the epoch).
    pub async fn evaluate(&self, subject: &str, now_ms: u64) -> RateLimitOutcome {
        let window_ms = self.policy.window_secs.saturating_mul(1000);
        let batch = WindowBatch {
            key: self.policy.window_key(subject),
            window_start_ms: now_ms.saturating_sub(window_ms),
            now_ms,
            member: format!("{}-{:016x}", now_ms, rand::random::<u64>()),
            ttl_secs: self.policy.window_secs,
        };

        let count = match tokio::time::timeout(self.store_timeout, self.store.record_and_count(&batch)).await {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                tracing::warn!(
                    policy = %self.policy.name,
                    store = self.store.name(),
                    error = %e,
                    "Rate limit store failed, allowing request"
                );
                metrics::record_rate_limit_store_failure(&self.policy.name);
                return RateLimitOutcome::Unenforced;
            }
            Err(_) => {
                tracing::warn!(
                    policy = %self.policy.name,
                    store = self.store.name(),
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "Rate limit store timed out, allowing request"
                );
                metrics::record_rate_limit_store_failure(&self.policy.name);
                return RateLimitOutcome::Unenforced;
            }
        };

        let limit = self.policy.max_requests;
        let reset_at_epoch_secs = now_ms.saturating_add(window_ms).div_ceil(1000);

        if count >= limit {
            RateLimitOutcome::Limited {
                limit,
                retry_after_secs: self.policy.window_secs,
                reset_at_epoch_secs,
            }
        } else {
            RateLimitOutcome::Allowed {
                limit,
                remaining: limit.saturating_sub(count + 1),
                reset_at_epoch_secs,
            }
        }
    }
}

/// All configured limiters, checked in order.
#[derive(Default)]
pub struct RateLimiters {
    limiters: Vec<RateLimiter>,
}

impl RateLimiters {
    pub fn new(limiters: Vec<RateLimiter>) -> Self {
        Self { limiters }
    }

    pub fn from_config(configs: &[RateLimitPolicyConfig], store: Arc<dyn CounterStore>, store_timeout: Duration) -> Self {
        let limiters = configs
            .iter()
            .map(|c| RateLimiter::new(RateLimitPolicy::from_config(c), store.clone(), store_timeout))
            .collect::<Vec<_>>();
        tracing::info!(policies = limiters.len(), store = store.name(), "Rate limiters configured");
        Self { limiters }
    }

    /// First limiter whose policy covers the request.
    pub fn find(&self, method: &Method, path: &str) -> Option<&RateLimiter> {
        self.limiters.iter().find(|l| l.policy.matches(method, path))
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn apply_headers(headers: &mut HeaderMap, limit: u64, remaining: u64, reset: u64) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset));
}

/// Middleware enforcing the first matching policy.
pub async fn rate_limit_middleware(
    State(limiters): State<Arc<RateLimiters>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(limiter) = limiters.find(request.method(), request.uri().path()) else {
        return next.run(request).await;
    };

    let subject = limiter.policy.key.subject(&request);

    match limiter.evaluate(&subject, epoch_millis()).await {
        RateLimitOutcome::Allowed {
            limit,
            remaining,
            reset_at_epoch_secs,
        } => {
            let mut response = next.run(request).await;
            apply_headers(response.headers_mut(), limit, remaining, reset_at_epoch_secs);
            response
        }
        RateLimitOutcome::Limited {
            limit,
            retry_after_secs,
            reset_at_epoch_secs,
        } => {
            tracing::warn!(
                policy = %limiter.policy.name,
                subject = %subject,
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(&limiter.policy.name);
            let mut response = ApiError::RateLimited { retry_after_secs }.into_response();
            apply_headers(response.headers_mut(), limit, 0, reset_at_epoch_secs);
            response
        }
        RateLimitOutcome::Unenforced => next.run(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::counter_store::{MemoryCounterStore, StoreError};
    use axum::{http::StatusCode, middleware, routing::get, Router};
    use futures_util::future::BoxFuture;
    use tower::ServiceExt;

    struct FailingStore;

    impl CounterStore for FailingStore {
        fn record_and_count<'a>(&'a self, _batch: &'a WindowBatch) -> BoxFuture<'a, Result<u64, StoreError>> {
            Box::pin(async { Err(StoreError::Unavailable("connection refused".into())) })
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    struct StalledStore;

    impl CounterStore for StalledStore {
        fn record_and_count<'a>(&'a self, _batch: &'a WindowBatch) -> BoxFuture<'a, Result<u64, StoreError>> {
            Box::pin(std::future::pending())
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    fn limiter(max: u64, window_secs: u64, store: Arc<dyn CounterStore>) -> RateLimiter {
        RateLimiter::new(
            RateLimitPolicy::new("test", window_secs, max, "test"),
            store,
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn test_n_plus_one_is_limited() {
        let limiter = limiter(3, 60, Arc::new(MemoryCounterStore::new()));
        let now = 1_700_000_000_000;

        let mut remaining = Vec::new();
        for i in 0..3 {
            match limiter.evaluate("1.2.3.4", now + i).await {
                RateLimitOutcome::Allowed { remaining: r, limit, .. } => {
                    assert_eq!(limit, 3);
                    remaining.push(r);
                }
                other => panic!("expected allowed, got {other:?}"),
            }
        }
        assert_eq!(remaining, vec![2, 1, 0]);

        assert_eq!(
            limiter.evaluate("1.2.3.4", now + 3).await,
            RateLimitOutcome::Limited {
                limit: 3,
                retry_after_secs: 60,
                reset_at_epoch_secs: 1_700_000_061,
            }
        );

        // Other subjects have their own window.
        assert!(limiter.evaluate("5.6.7.8", now + 3).await.is_allowed());
    }

    #[tokio::test]
    async fn test_window_elapses() {
        let limiter = limiter(1, 10, Arc::new(MemoryCounterStore::new()));
        let now = 1_700_000_000_000;

        assert!(limiter.evaluate("u", now).await.is_allowed());
        // Denied requests still occupy the window.
        assert!(!limiter.evaluate("u", now + 5_000).await.is_allowed());
        assert!(!limiter.evaluate("u", now + 10_001).await.is_allowed());
        assert!(limiter.evaluate("u", now + 20_002).await.is_allowed());
    }

    #[tokio::test]
    async fn test_reset_rounds_up() {
        let limiter = limiter(5, 60, Arc::new(MemoryCounterStore::new()));
        match limiter.evaluate("u", 1_700_000_000_250).await {
            RateLimitOutcome::Allowed { reset_at_epoch_secs, .. } => {
                assert_eq!(reset_at_epoch_secs, 1_700_000_061);
            }
            other => panic!("expected allowed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_huge_window_saturates() {
        let limiter = limiter(1, u64::MAX / 100, Arc::new(MemoryCounterStore::new()));
        let now = 1_700_000_000_000;

        match limiter.evaluate("u", now).await {
            RateLimitOutcome::Allowed { reset_at_epoch_secs, .. } => {
                assert_eq!(reset_at_epoch_secs, u64::MAX.div_ceil(1000));
            }
            other => panic!("expected allowed, got {other:?}"),
        }
        assert!(!limiter.evaluate("u", now + 1).await.is_allowed());
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let limiter = limiter(1, 60, Arc::new(FailingStore));
        for i in 0..10 {
            assert_eq!(limiter.evaluate("u", 1_000 + i).await, RateLimitOutcome::Unenforced);
        }
    }

    #[tokio::test]
    async fn test_store_timeout_fails_open() {
        let limiter = limiter(1, 60, Arc::new(StalledStore));
        assert_eq!(limiter.evaluate("u", 1_000).await, RateLimitOutcome::Unenforced);
    }

    #[test]
    fn test_key_spec_parsing() {
        assert!(matches!(KeyExtractor::from_spec("ip"), Some(KeyExtractor::Ip)));
        assert!(matches!(
            KeyExtractor::from_spec("header:X-User-Id"),
            Some(KeyExtractor::Header(name)) if name == "x-user-id"
        ));
        assert!(KeyExtractor::from_spec("cookie:sid").is_none());
        assert!(KeyExtractor::from_spec("header:").is_none());
        assert!(KeyExtractor::from_spec("").is_none());
    }

    #[test]
    fn test_subject_fallbacks() {
        let header = KeyExtractor::from_spec("header:x-user-id").unwrap();

        let req = Request::builder()
            .header("x-user-id", "user-42")
            .body(Body::empty())
            .unwrap();
        assert_eq!(header.subject(&req), "user-42");

        let mut req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(header.subject(&req), "unknown");

        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 9], 5555))));
        assert_eq!(header.subject(&req), "10.0.0.9");
        assert_eq!(KeyExtractor::Ip.subject(&req), "10.0.0.9");
    }

    #[test]
    fn test_policy_matching() {
        let policy = RateLimitPolicy::new("messages", 60, 10, "msg")
            .with_path_prefix("/api/messages")
            .with_methods([Method::POST]);

        assert!(policy.matches(&Method::POST, "/api/messages/123"));
        assert!(!policy.matches(&Method::GET, "/api/messages/123"));
        assert!(!policy.matches(&Method::POST, "/api/guilds"));
        assert_eq!(policy.window_key("1.2.3.4"), "ratelimit:msg:1.2.3.4");
    }

    fn app(limiters: RateLimiters) -> Router {
        Router::new()
            .route("/api/ping", get(|| async { "pong" }))
            .route("/health", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(Arc::new(limiters), rate_limit_middleware))
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_middleware_headers_and_429() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        let policy = RateLimitPolicy::new("api", 60, 2, "api").with_path_prefix("/api");
        let app = app(RateLimiters::new(vec![RateLimiter::new(
            policy,
            store,
            Duration::from_millis(100),
        )]));

        let res = app.clone().oneshot(get_req("/api/ping")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[X_RATELIMIT_LIMIT], "2");
        assert_eq!(res.headers()[X_RATELIMIT_REMAINING], "1");
        assert!(res.headers().contains_key(X_RATELIMIT_RESET));

        let res = app.clone().oneshot(get_req("/api/ping")).await.unwrap();
        assert_eq!(res.headers()[X_RATELIMIT_REMAINING], "0");

        let res = app.clone().oneshot(get_req("/api/ping")).await.unwrap();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()["retry-after"], "60");
        assert_eq!(res.headers()[X_RATELIMIT_REMAINING], "0");
        let body = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "RATE_LIMITED");
        assert_eq!(json["retryAfter"], 60_000);

        // Unmatched paths are not limited and carry no headers.
        let res = app.oneshot(get_req("/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(!res.headers().contains_key(X_RATELIMIT_LIMIT));
    }

    #[tokio::test]
    async fn test_middleware_fails_open_without_headers() {
        let policy = RateLimitPolicy::new("api", 60, 1, "api");
        let app = app(RateLimiters::new(vec![RateLimiter::new(
            policy,
            Arc::new(FailingStore),
            Duration::from_millis(100),
        )]));

        for _ in 0..5 {
            let res = app.clone().oneshot(get_req("/api/ping")).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            assert!(!res.headers().contains_key(X_RATELIMIT_LIMIT));
        }
    }
}
