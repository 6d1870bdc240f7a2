//! In-memory `LogStore` implementation.
//!
//! A single async mutex guards all state; `ingest` holds it across the
//! whole lookup-apply-append sequence, which gives the atomicity the state
//! machine requires on a single node.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::log::{EmailEvent, EmailLog, EmailStatus, NewEmailLog, NormalizedEvent};
use super::status::apply_event;
use super::store::{IngestOutcome, LogStore, SendRecord, StoreError};

#[derive(Default)]
struct MemoryInner {
    next_id: i64,
    logs: HashMap<i64, EmailLog>,
    by_message_id: HashMap<String, i64>,
    by_aws_message_id: HashMap<String, i64>,
    events: Vec<EmailEvent>,
}

impl MemoryInner {
    /// Correlation lookup: `message_id` first, then the AWS id fallback.
    fn resolve(&self, mail_id: &str) -> Option<i64> {
        self.by_message_id
            .get(mail_id)
            .or_else(|| self.by_aws_message_id.get(mail_id))
            .copied()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of logs currently tracked.
    pub async fn log_count(&self) -> usize {
        self.inner.lock().await.logs.len()
    }

    /// Total audit rows across all logs.
    pub async fn event_count(&self) -> usize {
        self.inner.lock().await.events.len()
    }

    /// Seed a fully-formed log, indexing both correlation keys.
    pub async fn insert_log(&self, log: EmailLog) {
        let mut inner = self.inner.lock().await;
        if let Some(message_id) = &log.message_id {
            inner.by_message_id.insert(message_id.clone(), log.id);
        }
        if let Some(aws_id) = &log.aws_message_id {
            inner.by_aws_message_id.insert(aws_id.clone(), log.id);
        }
        inner.next_id = inner.next_id.max(log.id);
        inner.logs.insert(log.id, log);
    }

    pub async fn get_log(&self, log_id: i64) -> Option<EmailLog> {
        self.inner.lock().await.logs.get(&log_id).cloned()
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn create_log(&self, new: NewEmailLog) -> Result<EmailLog, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;

        let log = EmailLog {
            id,
            message_id: new.message_id.clone(),
            aws_message_id: None,
            to: new.to,
            from: new.from,
            subject: new.subject,
            provider: new.provider,
            template_name: new.template_name,
            campaign_id: new.campaign_id,
            size_bytes: new.size_bytes,
            retry_count: 0,
            status: EmailStatus::Sent,
            sent_at: Some(Utc::now()),
            delivered_at: None,
            bounced_at: None,
            complained_at: None,
            opened_at: None,
            clicked_at: None,
            error_message: None,
        };

        if let Some(message_id) = new.message_id {
            inner.by_message_id.insert(message_id, id);
        }
        inner.logs.insert(id, log.clone());

        Ok(log)
    }

    async fn get_by_message_id(&self, message_id: &str) -> Result<Option<EmailLog>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_message_id
            .get(message_id)
            .and_then(|id| inner.logs.get(id))
            .cloned())
    }

    async fn get_by_aws_message_id(
        &self,
        aws_message_id: &str,
    ) -> Result<Option<EmailLog>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_aws_message_id
            .get(aws_message_id)
            .and_then(|id| inner.logs.get(id))
            .cloned())
    }

    async fn record_send_result(
        &self,
        log_id: i64,
        record: SendRecord,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;

        // Update the indexes first; the mutable borrow of the log below
        // would otherwise hold `inner` exclusively.
        if let SendRecord::Accepted {
            message_id,
            aws_message_id,
        } = &record
        {
            inner.by_message_id.insert(message_id.clone(), log_id);
            if let Some(aws_id) = aws_message_id {
                inner.by_aws_message_id.insert(aws_id.clone(), log_id);
            }
        }

        let log = inner
            .logs
            .get_mut(&log_id)
            .ok_or(StoreError::UnknownLog(log_id))?;

        match record {
            SendRecord::Accepted {
                message_id,
                aws_message_id,
            } => {
                log.message_id = Some(message_id);
                if aws_message_id.is_some() {
                    log.aws_message_id = aws_message_id;
                }
            }
            SendRecord::Failed { error } => {
                log.status = EmailStatus::Failed;
                log.error_message = Some(error);
                log.retry_count += 1;
            }
        }

        Ok(())
    }

    async fn ingest(&self, event: &NormalizedEvent) -> Result<IngestOutcome, StoreError> {
        let mail_id = match event.mail_id.as_deref() {
            Some(id) => id,
            None => return Ok(IngestOutcome::LogNotFound),
        };

        // Lock held across resolve + apply + append: the atomic unit.
        let mut inner = self.inner.lock().await;

        let log_id = match inner.resolve(mail_id) {
            Some(id) => id,
            None => return Ok(IngestOutcome::LogNotFound),
        };

        let log = inner
            .logs
            .get_mut(&log_id)
            .ok_or(StoreError::UnknownLog(log_id))?;

        let outcome = apply_event(log, event);
        let status = log.status;

        inner.events.push(EmailEvent::from_normalized(log_id, event));

        Ok(IngestOutcome::Applied {
            log_id,
            status,
            status_changed: outcome.status_changed,
        })
    }

    async fn events_for(&self, log_id: i64) -> Result<Vec<EmailEvent>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.log_id == log_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::log::{EventDetail, EventKind};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn bounce_event(mail_id: &str) -> NormalizedEvent {
        NormalizedEvent {
            kind: EventKind::Bounce,
            mail_id: Some(mail_id.to_string()),
            occurred_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            detail: EventDetail {
                bounce_type: Some("Permanent".to_string()),
                ..Default::default()
            },
        }
    }

    fn delivery_event(mail_id: &str) -> NormalizedEvent {
        NormalizedEvent {
            kind: EventKind::Delivery,
            mail_id: Some(mail_id.to_string()),
            occurred_at: Utc.timestamp_opt(1_700_000_100, 0).unwrap(),
            detail: EventDetail::default(),
        }
    }

    async fn store_with_log(message_id: Option<&str>, aws_id: Option<&str>) -> MemoryStore {
        let store = MemoryStore::new();
        let log = store
            .create_log(NewEmailLog {
                message_id: message_id.map(|s| s.to_string()),
                to: "to@example.com".to_string(),
                from: "from@example.com".to_string(),
                subject: "Test".to_string(),
                provider: "ses".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        if let Some(aws_id) = aws_id {
            store
                .record_send_result(
                    log.id,
                    SendRecord::Accepted {
                        message_id: message_id.unwrap_or(aws_id).to_string(),
                        aws_message_id: Some(aws_id.to_string()),
                    },
                )
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_ingest_applies_and_appends() {
        let store = store_with_log(Some("abc123"), None).await;

        let outcome = store.ingest(&bounce_event("abc123")).await.unwrap();

        match outcome {
            IngestOutcome::Applied {
                log_id,
                status,
                status_changed,
            } => {
                assert_eq!(status, EmailStatus::HardBounced);
                assert!(status_changed);
                assert_eq!(store.events_for(log_id).await.unwrap().len(), 1);
            }
            other => panic!("Expected Applied, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ingest_unknown_mail_id_is_not_found() {
        let store = store_with_log(Some("abc123"), None).await;

        let outcome = store.ingest(&bounce_event("missing")).await.unwrap();

        assert_eq!(outcome, IngestOutcome::LogNotFound);
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn test_correlation_falls_back_to_aws_message_id() {
        let store = MemoryStore::new();
        let log = store
            .create_log(NewEmailLog {
                message_id: None,
                to: "to@example.com".to_string(),
                from: "from@example.com".to_string(),
                subject: "Test".to_string(),
                provider: "ses".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .record_send_result(
                log.id,
                SendRecord::Accepted {
                    message_id: "other".to_string(),
                    aws_message_id: Some("X".to_string()),
                },
            )
            .await
            .unwrap();

        // Primary lookup misses, fallback hits
        assert!(store.get_by_message_id("X").await.unwrap().is_none());
        let outcome = store.ingest(&delivery_event("X")).await.unwrap();

        assert!(matches!(outcome, IngestOutcome::Applied { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_events_double_audit_single_timestamp() {
        let store = store_with_log(Some("abc123"), None).await;

        store.ingest(&bounce_event("abc123")).await.unwrap();
        let first = store.get_log(1).await.unwrap().bounced_at;

        let mut later = bounce_event("abc123");
        later.occurred_at = Utc.timestamp_opt(1_700_009_999, 0).unwrap();
        store.ingest(&later).await.unwrap();

        let log = store.get_log(1).await.unwrap();
        assert_eq!(log.bounced_at, first);
        assert_eq!(store.events_for(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_delivery_and_bounce_settle_on_bounce() {
        for _ in 0..16 {
            let store = Arc::new(store_with_log(Some("race"), None).await);

            let s1 = Arc::clone(&store);
            let s2 = Arc::clone(&store);
            let a = tokio::spawn(async move { s1.ingest(&delivery_event("race")).await });
            let b = tokio::spawn(async move { s2.ingest(&bounce_event("race")).await });
            a.await.unwrap().unwrap();
            b.await.unwrap().unwrap();

            let log = store.get_log(1).await.unwrap();
            assert_eq!(log.status, EmailStatus::HardBounced);
            assert_eq!(store.events_for(1).await.unwrap().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_failed_send_increments_retry_count() {
        let store = store_with_log(Some("abc123"), None).await;

        store
            .record_send_result(
                1,
                SendRecord::Failed {
                    error: "connection refused".to_string(),
                },
            )
            .await
            .unwrap();

        let log = store.get_log(1).await.unwrap();
        assert_eq!(log.status, EmailStatus::Failed);
        assert_eq!(log.retry_count, 1);
        assert_eq!(log.error_message.as_deref(), Some("connection refused"));
    }
}
