//! Persistence seam for email logs and their audit trail.
//!
//! The service consumes storage through this trait; the in-memory
//! implementation in `memory` backs single-node deployments and tests.
//! `ingest` is the correlation + state-machine step and MUST be atomic per
//! log record: implementations hold a lock (or database transaction) across
//! the read-modify-write so racing notifications cannot lose updates.

use async_trait::async_trait;
use thiserror::Error;

use super::log::{EmailEvent, EmailLog, EmailStatus, NewEmailLog, NormalizedEvent};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("no log with id {0}")]
    UnknownLog(i64),
}

/// Synchronous send result recorded by the dispatch interceptor.
#[derive(Debug, Clone)]
pub enum SendRecord {
    /// The provider accepted the message.
    Accepted {
        message_id: String,
        aws_message_id: Option<String>,
    },
    /// The send call failed; increments the log's retry count.
    Failed { error: String },
}

/// Outcome of ingesting one provider notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Event correlated and applied; one audit row appended.
    Applied {
        log_id: i64,
        status: EmailStatus,
        status_changed: bool,
    },
    /// Neither correlation key matched. The webhook still answers 200 for
    /// this so the provider does not retry forever.
    LogNotFound,
}

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Create a log at send time (status `sent`).
    async fn create_log(&self, new: NewEmailLog) -> Result<EmailLog, StoreError>;

    /// Primary correlation lookup.
    async fn get_by_message_id(&self, message_id: &str) -> Result<Option<EmailLog>, StoreError>;

    /// Secondary correlation lookup.
    async fn get_by_aws_message_id(
        &self,
        aws_message_id: &str,
    ) -> Result<Option<EmailLog>, StoreError>;

    /// Record the synchronous outcome of a send attempt.
    async fn record_send_result(&self, log_id: i64, record: SendRecord)
        -> Result<(), StoreError>;

    /// Correlate a normalized event to a log (message id first, AWS message
    /// id as fallback), apply the state machine and append the audit row,
    /// all as one atomic unit.
    async fn ingest(&self, event: &NormalizedEvent) -> Result<IngestOutcome, StoreError>;

    /// Audit trail for a log, oldest first.
    async fn events_for(&self, log_id: i64) -> Result<Vec<EmailEvent>, StoreError>;
}
