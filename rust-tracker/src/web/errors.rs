//! Webhook error taxonomy with HTTP status mapping.
//!
//! Every stage returns a tagged error; the handler converts it into the
//! response the provider expects:
//!
//! - `413` oversized payload, `429` rate limited, `403` IP or signature
//!   rejected: permanent, the provider should not retry;
//! - `400` stale/malformed input: permanent;
//! - `500` internal/timeout: transient, SNS retries the delivery.
//!
//! Business misses (log not found, tracking disabled) are NOT errors; they
//! are 200 outcomes handled in `handlers`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::process::ProcessError;
use crate::web::signature::SignatureError;

/// Body returned for every webhook response, success or failure.
#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("payload of {size} bytes exceeds limit of {max} bytes")]
    RequestTooLarge { size: usize, max: usize },

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("source ip {0} is not in the allow-list")]
    InvalidSourceIp(String),

    #[error("envelope timestamp is {age_seconds}s old (limit {max_seconds}s)")]
    RequestTooOld {
        age_seconds: i64,
        max_seconds: i64,
    },

    #[error("envelope timestamp missing or unparseable")]
    InvalidTimestamp,

    #[error("envelope is malformed or missing a Type field")]
    InvalidEnvelope,

    #[error(transparent)]
    InvalidSignature(#[from] SignatureError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("processing deadline exceeded")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl WebhookError {
    /// Stable reason token, used in the response body and warn logs.
    pub fn reason(&self) -> &'static str {
        match self {
            WebhookError::RequestTooLarge { .. } => "request_too_large",
            WebhookError::RateLimited => "rate_limited",
            WebhookError::InvalidSourceIp(_) => "invalid_source_ip",
            WebhookError::RequestTooOld { .. } => "request_too_old",
            WebhookError::InvalidTimestamp => "invalid_timestamp",
            WebhookError::InvalidEnvelope => "invalid_envelope",
            WebhookError::InvalidSignature(_) => "invalid_signature",
            WebhookError::Process(ProcessError::InvalidJson(_)) => "invalid_json",
            WebhookError::Process(ProcessError::MissingSubscribeUrl) => "missing_subscribe_url",
            WebhookError::Process(ProcessError::Store(_)) => "internal_error",
            WebhookError::Timeout => "timeout",
            WebhookError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::RequestTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            WebhookError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            WebhookError::InvalidSourceIp(_) | WebhookError::InvalidSignature(_) => {
                StatusCode::FORBIDDEN
            }
            WebhookError::Process(ProcessError::Store(_))
            | WebhookError::Timeout
            | WebhookError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // Everything else is client-caused and maps to 400
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(WebhookResponse {
                status: self.reason(),
            }),
        )
            .into_response()
    }
}
