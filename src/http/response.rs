//! Responses produced by the governance layer itself.
//!
//! Policy violations are answered with a small JSON body:
//! `{"code": "...", "message": "...", "retryAfter": <ms>}`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Structured error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    /// Milliseconds until the client may retry.
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Rejections surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    RateLimited { retry_after_secs: u64 },
    OriginDenied,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::OriginDenied => StatusCode::FORBIDDEN,
        }
    }

    pub fn body(&self) -> ErrorBody {
        match self {
            ApiError::RateLimited { retry_after_secs } => ErrorBody {
                code: "RATE_LIMITED",
                message: "Too many requests, please try again later.".to_string(),
                retry_after: Some(retry_after_secs * 1000),
            },
            ApiError::OriginDenied => ErrorBody {
                code: "ORIGIN_DENIED",
                message: "Origin not allowed.".to_string(),
                retry_after: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.body())).into_response();
        if let ApiError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}
