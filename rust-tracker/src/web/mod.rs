//! Web server module for the inbound event webhook.
//!
//! One POST endpoint receives SNS deliveries; every request passes the
//! security gate before the event pipeline touches it. Processing happens
//! inline (no queue hop) under a per-request deadline, because SNS retries
//! anything that does not answer 200 in time.

pub mod errors;
pub mod gate;
pub mod handlers;
pub mod rate_limit;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use errors::{WebhookError, WebhookResponse};
pub use gate::SecurityGate;
pub use handlers::{email_webhook, health, AppState, HealthResponse};
pub use rate_limit::RateLimiter;
pub use signature::{SignatureError, SignatureVerifier};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/email", post(email_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
