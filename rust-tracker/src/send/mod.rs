//! Outbound dispatch with delivery tracking.
//!
//! `TrackedMailer` wraps any `MailTransport`: it creates the `EmailLog`
//! before the send, tags the outgoing message with a correlation header,
//! and records the synchronous result afterwards. Tracking is best-effort
//! on both sides of the send: a store failure never fails the email.

pub mod smtp;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::track::{LogStore, NewEmailLog, SendRecord};

pub use smtp::SmtpMailTransport;

/// Header carrying the tracking log id on outgoing messages.
pub const CORRELATION_HEADER: &str = "X-Sestrack-Log-Id";

/// An email ready for dispatch.
#[derive(Debug, Clone, Default)]
pub struct OutgoingEmail {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub template_name: Option<String>,
    pub campaign_id: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl OutgoingEmail {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Rough wire size, recorded on the log for reporting.
    fn size_estimate(&self) -> usize {
        self.subject.len()
            + self.body_text.as_ref().map(|s| s.len()).unwrap_or(0)
            + self.body_html.as_ref().map(|s| s.len()).unwrap_or(0)
    }
}

/// Provider acknowledgement for an accepted message.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// Provider-issued message identifier
    pub message_id: String,
    /// AWS message id when the provider is SES, used as the secondary
    /// correlation key
    pub aws_message_id: Option<String>,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Provider name recorded on the log ("ses", "smtp", ...).
    fn provider(&self) -> &str;

    async fn deliver(&self, email: &OutgoingEmail) -> Result<ProviderResponse>;
}

/// Dispatch interceptor: wraps a transport with tracking.
pub struct TrackedMailer<T: MailTransport> {
    transport: T,
    store: Arc<dyn LogStore>,
}

impl<T: MailTransport> TrackedMailer<T> {
    pub fn new(transport: T, store: Arc<dyn LogStore>) -> Self {
        Self { transport, store }
    }

    /// Send an email, tracking the attempt.
    ///
    /// The returned result is the transport's alone: tracking failures are
    /// logged and swallowed on both the create and the record path.
    pub async fn send(&self, mut email: OutgoingEmail) -> Result<ProviderResponse> {
        let log_id = self.ensure_log(&mut email).await;

        let result = self.transport.deliver(&email).await;

        if let Some(log_id) = log_id {
            let record = match &result {
                Ok(response) => SendRecord::Accepted {
                    message_id: response.message_id.clone(),
                    aws_message_id: response.aws_message_id.clone(),
                },
                Err(e) => SendRecord::Failed {
                    error: e.to_string(),
                },
            };

            if let Err(e) = self.store.record_send_result(log_id, record).await {
                warn!(log_id = log_id, error = %e, "send_tracking_update_failed");
            }
        }

        match &result {
            Ok(response) => info!(
                to = %email.to,
                message_id = %response.message_id,
                log_id = ?log_id,
                "email_sent"
            ),
            Err(e) => warn!(to = %email.to, error = %e, log_id = ?log_id, "email_send_failed"),
        }

        result
    }

    /// Create the tracking log and tag the message, or reuse the log a
    /// retry already carries. Returns None when tracking is unavailable.
    async fn ensure_log(&self, email: &mut OutgoingEmail) -> Option<i64> {
        if let Some(existing) = email.header(CORRELATION_HEADER) {
            if let Ok(log_id) = existing.parse::<i64>() {
                return Some(log_id);
            }
        }

        let new_log = NewEmailLog {
            message_id: None,
            to: email.to.clone(),
            from: email.from.clone(),
            subject: email.subject.clone(),
            provider: self.transport.provider().to_string(),
            template_name: email.template_name.clone(),
            campaign_id: email.campaign_id.clone(),
            size_bytes: Some(email.size_estimate()),
        };

        match self.store.create_log(new_log).await {
            Ok(log) => {
                email
                    .headers
                    .push((CORRELATION_HEADER.to_string(), log.id.to_string()));
                Some(log.id)
            }
            Err(e) => {
                warn!(to = %email.to, error = %e, "send_tracking_create_failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{
        EmailEvent, EmailLog, EmailStatus, IngestOutcome, MemoryStore, NormalizedEvent,
        StoreError,
    };
    use std::sync::Mutex;

    struct FakeTransport {
        fail: bool,
        delivered: Mutex<Vec<OutgoingEmail>>,
    }

    impl FakeTransport {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MailTransport for FakeTransport {
        fn provider(&self) -> &str {
            "fake"
        }

        async fn deliver(&self, email: &OutgoingEmail) -> Result<ProviderResponse> {
            self.delivered.lock().unwrap().push(email.clone());
            if self.fail {
                anyhow::bail!("connection refused");
            }
            Ok(ProviderResponse {
                message_id: "prov-1".to_string(),
                aws_message_id: Some("aws-1".to_string()),
            })
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl LogStore for BrokenStore {
        async fn create_log(&self, _new: NewEmailLog) -> Result<EmailLog, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn get_by_message_id(&self, _id: &str) -> Result<Option<EmailLog>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn get_by_aws_message_id(
            &self,
            _id: &str,
        ) -> Result<Option<EmailLog>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn record_send_result(
            &self,
            _log_id: i64,
            _record: SendRecord,
        ) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn ingest(&self, _event: &NormalizedEvent) -> Result<IngestOutcome, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn events_for(&self, _log_id: i64) -> Result<Vec<EmailEvent>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            to: "to@example.com".to_string(),
            from: "from@example.com".to_string(),
            subject: "Welcome".to_string(),
            body_text: Some("Hello".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_successful_send_records_provider_ids() {
        let store = Arc::new(MemoryStore::new());
        let mailer = TrackedMailer::new(FakeTransport::new(false), Arc::clone(&store) as _);

        let response = mailer.send(email()).await.unwrap();

        assert_eq!(response.message_id, "prov-1");
        let log = store.get_log(1).await.unwrap();
        assert_eq!(log.status, EmailStatus::Sent);
        assert_eq!(log.message_id.as_deref(), Some("prov-1"));
        assert_eq!(log.aws_message_id.as_deref(), Some("aws-1"));
        assert!(log.sent_at.is_some());
    }

    #[tokio::test]
    async fn test_outgoing_message_is_tagged_with_log_id() {
        let store = Arc::new(MemoryStore::new());
        let transport = FakeTransport::new(false);
        let mailer = TrackedMailer::new(transport, Arc::clone(&store) as _);

        mailer.send(email()).await.unwrap();

        let delivered = mailer.transport.delivered.lock().unwrap();
        assert_eq!(delivered[0].header(CORRELATION_HEADER), Some("1"));
    }

    #[tokio::test]
    async fn test_failed_send_records_error_and_propagates() {
        let store = Arc::new(MemoryStore::new());
        let mailer = TrackedMailer::new(FakeTransport::new(true), Arc::clone(&store) as _);

        let result = mailer.send(email()).await;

        assert!(result.is_err());
        let log = store.get_log(1).await.unwrap();
        assert_eq!(log.status, EmailStatus::Failed);
        assert_eq!(log.retry_count, 1);
        assert!(log.error_message.as_deref().unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn test_retry_reuses_existing_log() {
        let store = Arc::new(MemoryStore::new());
        let mailer = TrackedMailer::new(FakeTransport::new(false), Arc::clone(&store) as _);

        let mut retry = email();
        // First attempt already tagged this message
        let first = mailer.send(retry.clone()).await.unwrap();
        assert_eq!(first.message_id, "prov-1");
        retry
            .headers
            .push((CORRELATION_HEADER.to_string(), "1".to_string()));

        mailer.send(retry).await.unwrap();

        assert_eq!(store.log_count().await, 1);
    }

    #[tokio::test]
    async fn test_broken_store_never_fails_the_send() {
        let mailer = TrackedMailer::new(FakeTransport::new(false), Arc::new(BrokenStore));

        let response = mailer.send(email()).await.unwrap();

        assert_eq!(response.message_id, "prov-1");
    }
}
