//! Origin admission policy.
//!
//! Decides whether a browser `Origin` is trusted. The allow-list is parsed once from
//! configuration and never mutated, so the policy can be shared freely across requests.

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, request::Parts, HeaderName, HeaderValue, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use url::{Host, Url};

use crate::config::EnvironmentMode;
use crate::http::response::ApiError;
use crate::observability::metrics;

/// Normalized set of trusted origins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    allow_any: bool,
    origins: BTreeSet<String>,
}

impl AllowList {
    /// True when the list contained the `*` wildcard.
    pub fn allows_any(&self) -> bool {
        self.allow_any
    }

    /// Whether the already-normalized origin is configured.
    pub fn contains(&self, origin: &str) -> bool {
        self.origins.contains(origin)
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.origins.iter().map(String::as_str)
    }
}

/// Parse a comma-separated origin list. Entries that are not absolute
/// `http`/`https` URLs are dropped.
pub fn parse_allow_list(raw: &str) -> AllowList {
    let mut list = AllowList::default();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        if entry == "*" {
            list.allow_any = true;
            continue;
        }
        match normalize_origin(entry) {
            Some(origin) => {
                list.origins.insert(origin);
            }
            None => {
                tracing::warn!(entry = %entry, "Ignoring malformed allowed origin");
            }
        }
    }

    list
}

/// Reduce a URL to `scheme://host[:port]`. Default ports are elided and the host
/// is lowercased; any path, query or fragment is discarded.
pub fn normalize_origin(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.host()?;
    Some(url.origin().ascii_serialization())
}

/// Decide whether `origin` may call the API.
pub fn is_allowed(origin: Option<&str>, mode: EnvironmentMode, list: &AllowList) -> bool {
    // Non-browser clients send no Origin.
    let Some(origin) = origin else {
        return true;
    };

    if list.allow_any {
        return true;
    }

    let Some(normalized) = normalize_origin(origin) else {
        return false;
    };

    if list.contains(&normalized) {
        return true;
    }

    mode == EnvironmentMode::Development && is_local_origin(&normalized)
}

/// Loopback, unspecified and RFC 1918 hosts, reachable from a developer's LAN.
fn is_local_origin(normalized: &str) -> bool {
    let Ok(url) = Url::parse(normalized) else {
        return false;
    };
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip == Ipv4Addr::LOCALHOST || ip.is_unspecified() || ip.is_private(),
        Some(Host::Ipv6(ip)) => ip == Ipv6Addr::LOCALHOST,
        None => false,
    }
}

/// Origin policy bound to a deployment mode.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    mode: EnvironmentMode,
    allow_list: AllowList,
}

impl OriginPolicy {
    pub fn new(mode: EnvironmentMode, allow_list: AllowList) -> Self {
        Self { mode, allow_list }
    }

    /// Build from the raw configured string.
    pub fn from_config(mode: EnvironmentMode, raw: &str) -> Self {
        let allow_list = parse_allow_list(raw);
        tracing::info!(
            mode = %mode,
            allow_any = allow_list.allows_any(),
            origins = allow_list.len(),
            "Origin policy loaded"
        );
        Self::new(mode, allow_list)
    }

    pub fn mode(&self) -> EnvironmentMode {
        self.mode
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    pub fn allows(&self, origin: Option<&str>) -> bool {
        is_allowed(origin, self.mode, &self.allow_list)
    }

    /// Check a raw header value; non-UTF-8 origins are denied.
    pub fn allows_header(&self, origin: Option<&HeaderValue>) -> bool {
        match origin {
            None => true,
            Some(value) => value.to_str().map(|o| self.allows(Some(o))).unwrap_or(false),
        }
    }
}

/// CORS layer answering preflights according to the policy.
pub fn cors_layer(policy: Arc<OriginPolicy>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| policy.allows_header(Some(origin)),
        ))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
            header::RETRY_AFTER,
            HeaderName::from_static("x-request-id"),
        ])
}

/// Reject requests from untrusted browser origins before any other stage runs.
pub async fn origin_guard_middleware(
    State(policy): State<Arc<OriginPolicy>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let origin = request.headers().get(header::ORIGIN);
    if policy.allows_header(origin) {
        return next.run(request).await;
    }

    tracing::warn!(
        origin = ?origin,
        mode = %policy.mode(),
        path = %request.uri().path(),
        "Origin denied"
    );
    metrics::record_origin_denied();
    ApiError::OriginDenied.into_response()
}
