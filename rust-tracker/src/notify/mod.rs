//! Notification sink for broadcasting tracking updates.
//!
//! Downstream consumers (dashboards, suppression jobs) subscribe to a
//! queue of status updates. Broadcasting is strictly fire-and-forget: a
//! sink failure is logged by the caller and never fails webhook processing.

pub mod amqp;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::track::{EmailStatus, EventKind};

pub use amqp::AmqpSink;

/// Payload broadcast after an event is applied to a log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingUpdate {
    pub id: Uuid,
    pub log_id: i64,
    pub event_type: EventKind,
    pub status: EmailStatus,
    pub status_changed: bool,
    pub occurred_at: DateTime<Utc>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one update to `topic`. Best-effort; callers swallow errors.
    async fn broadcast(&self, topic: &str, update: &TrackingUpdate) -> anyhow::Result<()>;
}

/// Sink that drops every update; used when no broker is configured.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn broadcast(&self, _topic: &str, _update: &TrackingUpdate) -> anyhow::Result<()> {
        Ok(())
    }
}

/// In-memory sink capturing updates for assertions.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    updates: std::sync::Mutex<Vec<(String, TrackingUpdate)>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn updates(&self) -> Vec<(String, TrackingUpdate)> {
        self.updates.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl NotificationSink for RecordingSink {
    async fn broadcast(&self, topic: &str, update: &TrackingUpdate) -> anyhow::Result<()> {
        self.updates
            .lock()
            .unwrap()
            .push((topic.to_string(), update.clone()));
        Ok(())
    }
}
