//! Webhook endpoint handlers.
//!
//! The email webhook runs the full pipeline inline (gate, envelope parse,
//! gate again, process) under one overall deadline. Anything the provider
//! should not retry answers 4xx immediately; business misses still answer
//! 200 so SNS stops redelivering.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::notify::NotificationSink;
use crate::process::{EventPipeline, ProcessOutcome, SnsEnvelope};
use crate::track::LogStore;
use crate::web::errors::{WebhookError, WebhookResponse};
use crate::web::gate::SecurityGate;
use crate::web::signature::SignatureVerifier;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub gate: Arc<SecurityGate>,
    pub pipeline: Arc<EventPipeline>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn LogStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let config = Arc::new(config);
        let gate = Arc::new(SecurityGate::new(
            Arc::clone(&config),
            SignatureVerifier::new(),
        ));
        let pipeline = Arc::new(EventPipeline::new(Arc::clone(&config), store, sink));

        Self {
            config,
            gate,
            pipeline,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Email Event Webhook
// =============================================================================

/// `POST /webhooks/email`, the SNS delivery endpoint.
pub async fn email_webhook(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let source_ip = resolve_source_ip(&headers, connect_info.map(|ci| ci.0));

    match handle(&state, source_ip, &body).await {
        Ok(outcome) => {
            info!(
                outcome = outcome.as_str(),
                source_ip = ?source_ip,
                body_length = body.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "webhook_processed"
            );
            (
                StatusCode::OK,
                Json(WebhookResponse {
                    status: outcome.as_str(),
                }),
            )
                .into_response()
        }
        Err(err) => {
            if err.status_code().is_server_error() {
                error!(
                    reason = err.reason(),
                    error = %err,
                    source_ip = ?source_ip,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "webhook_failed"
                );
            } else {
                warn!(
                    reason = err.reason(),
                    error = %err,
                    source_ip = ?source_ip,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "webhook_rejected"
                );
            }
            err.into_response()
        }
    }
}

async fn handle(
    state: &AppState,
    source_ip: Option<IpAddr>,
    body: &Bytes,
) -> Result<ProcessOutcome, WebhookError> {
    // Transport checks first; an oversized or throttled request is never
    // parsed at all.
    state.gate.check_transport(source_ip, body.len())?;

    let envelope: SnsEnvelope =
        serde_json::from_slice(body).map_err(|_| WebhookError::InvalidEnvelope)?;

    let deadline = Duration::from_secs(state.config.handler_timeout_seconds);
    tokio::time::timeout(deadline, async {
        state.gate.check_envelope(&envelope).await?;
        state
            .pipeline
            .process(&envelope)
            .await
            .map_err(WebhookError::from)
    })
    .await
    .map_err(|_| WebhookError::Timeout)?
}

/// Caller IP: `X-Forwarded-For` when a proxy fronts us, else the peer.
fn resolve_source_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .or_else(|| peer.map(|addr| addr.ip()))
}
