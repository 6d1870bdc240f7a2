//! Event-processing pipeline.
//!
//! Turns a gate-approved SNS envelope into a tracking outcome:
//!
//! ```text
//! SnsEnvelope → classify() → (handshake | SesEvent)
//!                               → normalize() → LogStore::ingest → broadcast
//! ```
//!
//! Business misses (no matching log, tracking disabled, unknown SNS type)
//! are outcomes, not errors: the webhook answers 200 for them so the
//! provider does not retry deliveries we will never want.

pub mod envelope;
pub mod event;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::notify::{NotificationSink, TrackingUpdate};
use crate::track::{IngestOutcome, LogStore, StoreError};

pub use envelope::{classify, SnsEnvelope, SnsMessage};
pub use event::{normalize, SesEvent};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("notification message is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("subscription confirmation without a SubscribeURL")]
    MissingSubscribeUrl,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Terminal outcome of processing one webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Event correlated, applied and recorded.
    Processed,
    /// No log matched either correlation key; nothing was written.
    LogNotFound,
    /// Tracking (or SES ingestion) is switched off.
    TrackingDisabled,
    /// Unknown SNS message type, acknowledged without action.
    Ignored,
    SubscriptionConfirmed,
    UnsubscribeAcknowledged,
}

impl ProcessOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessOutcome::Processed => "processed",
            ProcessOutcome::LogNotFound => "log_not_found",
            ProcessOutcome::TrackingDisabled => "tracking_disabled",
            ProcessOutcome::Ignored => "ignored",
            ProcessOutcome::SubscriptionConfirmed => "subscription_confirmed",
            ProcessOutcome::UnsubscribeAcknowledged => "unsubscribe_acknowledged",
        }
    }
}

/// Orchestrates envelope classification, normalization, ingestion and the
/// best-effort broadcast.
pub struct EventPipeline {
    config: Arc<Config>,
    store: Arc<dyn LogStore>,
    sink: Arc<dyn NotificationSink>,
    http: reqwest::Client,
}

impl EventPipeline {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn LogStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.confirm_timeout_ms))
            .build()
            .unwrap_or_default();

        Self {
            config,
            store,
            sink,
            http,
        }
    }

    /// Process one gate-approved envelope.
    pub async fn process(&self, envelope: &SnsEnvelope) -> Result<ProcessOutcome, ProcessError> {
        if !self.config.tracking_enabled {
            info!("tracking_disabled");
            return Ok(ProcessOutcome::TrackingDisabled);
        }

        match classify(envelope)? {
            SnsMessage::Confirmation { subscribe_url } => {
                self.confirm_subscription(subscribe_url);
                Ok(ProcessOutcome::SubscriptionConfirmed)
            }

            SnsMessage::Unsubscribed => {
                info!(topic_arn = ?envelope.topic_arn, "sns_unsubscribed");
                Ok(ProcessOutcome::UnsubscribeAcknowledged)
            }

            SnsMessage::Ignored { .. } => Ok(ProcessOutcome::Ignored),

            SnsMessage::Notification(ses_event) => {
                if !self.config.ses_events_enabled {
                    info!("ses_events_disabled");
                    return Ok(ProcessOutcome::TrackingDisabled);
                }

                self.ingest(&ses_event).await
            }
        }
    }

    async fn ingest(&self, ses_event: &SesEvent) -> Result<ProcessOutcome, ProcessError> {
        let normalized = normalize(ses_event);

        if normalized.mail_id.is_none() {
            warn!(
                event_type = normalized.kind.as_str(),
                has_mail = ses_event.mail.is_some(),
                mail_source = ?ses_event.mail.as_ref().and_then(|m| m.source.as_deref()),
                "event_missing_mail_id"
            );
            return Ok(ProcessOutcome::LogNotFound);
        }

        match self.store.ingest(&normalized).await? {
            IngestOutcome::Applied {
                log_id,
                status,
                status_changed,
            } => {
                info!(
                    log_id = log_id,
                    event_type = normalized.kind.as_str(),
                    status = status.as_str(),
                    status_changed = status_changed,
                    "event_applied"
                );

                let update = TrackingUpdate {
                    id: uuid::Uuid::new_v4(),
                    log_id,
                    event_type: normalized.kind.clone(),
                    status,
                    status_changed,
                    occurred_at: normalized.occurred_at,
                };

                // Fire-and-forget: a sink failure never fails the webhook
                if let Err(e) = self
                    .sink
                    .broadcast(&self.config.tracking_queue, &update)
                    .await
                {
                    warn!(error = %e, log_id = log_id, "tracking_broadcast_failed");
                }

                Ok(ProcessOutcome::Processed)
            }

            IngestOutcome::LogNotFound => {
                warn!(
                    mail_id = ?normalized.mail_id,
                    event_type = normalized.kind.as_str(),
                    destination = ?ses_event.mail.as_ref().map(|m| &m.destination),
                    "email_log_not_found"
                );
                Ok(ProcessOutcome::LogNotFound)
            }
        }
    }

    /// Confirm an SNS subscription off the request path.
    ///
    /// The GET carries its own timeout; a failure is logged and left for
    /// SNS to retry the handshake.
    fn confirm_subscription(&self, url: String) {
        info!(url_length = url.len(), "sns_subscription_confirming");

        let http = self.http.clone();
        tokio::spawn(async move {
            match http.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    info!("sns_subscription_confirmed");
                }
                Ok(response) => {
                    warn!(status = %response.status(), "sns_subscription_confirm_rejected");
                }
                Err(e) => {
                    warn!(error = %e, "sns_subscription_confirm_failed");
                }
            }
        });
    }
}
