//! Email tracking domain model.
//!
//! One `EmailLog` per outbound send attempt, plus an append-only trail of
//! `EmailEvent` audit records for every provider notification that
//! correlates to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a tracked email.
///
/// `precedence_rank` defines the partial order that keeps out-of-order
/// webhook notifications from downgrading a final state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Sent,
    Delivered,
    Bounced,
    HardBounced,
    SoftBounced,
    Opened,
    Clicked,
    Failed,
    Rejected,
    Delayed,
    Complaint,
}

impl EmailStatus {
    /// Most-final-first ordering used by the status state machine.
    ///
    /// `hard_bounced`/`rejected` > `bounced`/`complaint` >
    /// `soft_bounced`/`delayed` > `clicked` > `opened` > `delivered` >
    /// `sent`/`failed`.
    pub fn precedence_rank(self) -> u8 {
        match self {
            EmailStatus::HardBounced | EmailStatus::Rejected => 6,
            EmailStatus::Bounced | EmailStatus::Complaint => 5,
            EmailStatus::SoftBounced | EmailStatus::Delayed => 4,
            EmailStatus::Clicked => 3,
            EmailStatus::Opened => 2,
            EmailStatus::Delivered => 1,
            EmailStatus::Sent | EmailStatus::Failed => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmailStatus::Sent => "sent",
            EmailStatus::Delivered => "delivered",
            EmailStatus::Bounced => "bounced",
            EmailStatus::HardBounced => "hard_bounced",
            EmailStatus::SoftBounced => "soft_bounced",
            EmailStatus::Opened => "opened",
            EmailStatus::Clicked => "clicked",
            EmailStatus::Failed => "failed",
            EmailStatus::Rejected => "rejected",
            EmailStatus::Delayed => "delayed",
            EmailStatus::Complaint => "complaint",
        }
    }
}

/// Discriminant over the provider event set.
///
/// Closed enum with an explicit `Unknown` variant so unrecognized provider
/// kinds pass through instead of failing the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Send,
    Delivery,
    Bounce,
    Complaint,
    Open,
    Click,
    Reject,
    DeliveryDelay,
    Subscription,
    RenderingFailure,
    Unknown(String),
}

impl EventKind {
    /// Map a provider `eventType` string to a kind.
    ///
    /// SES uses capitalized names in the event-publishing format
    /// ("Bounce", "DeliveryDelay", "Rendering Failure") and the same set
    /// appears camelCased in configuration; both are accepted.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "send" => EventKind::Send,
            "delivery" => EventKind::Delivery,
            "bounce" => EventKind::Bounce,
            "complaint" => EventKind::Complaint,
            "open" => EventKind::Open,
            "click" => EventKind::Click,
            "reject" => EventKind::Reject,
            "deliverydelay" | "delivery_delay" => EventKind::DeliveryDelay,
            "subscription" => EventKind::Subscription,
            "renderingfailure" | "rendering failure" | "rendering_failure" => {
                EventKind::RenderingFailure
            }
            _ => EventKind::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Send => "send",
            EventKind::Delivery => "delivery",
            EventKind::Bounce => "bounce",
            EventKind::Complaint => "complaint",
            EventKind::Open => "open",
            EventKind::Click => "click",
            EventKind::Reject => "reject",
            EventKind::DeliveryDelay => "delivery_delay",
            EventKind::Subscription => "subscription",
            EventKind::RenderingFailure => "rendering_failure",
            EventKind::Unknown(raw) => raw.as_str(),
        }
    }
}

/// One row per outbound email attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailLog {
    /// Surrogate key assigned by the store
    pub id: i64,
    /// Provider-issued identifier, primary correlation key
    pub message_id: Option<String>,
    /// AWS message id, secondary correlation key; 1:1 with the log once known
    pub aws_message_id: Option<String>,

    pub to: String,
    pub from: String,
    pub subject: String,
    pub provider: String,
    pub template_name: Option<String>,
    pub campaign_id: Option<String>,
    pub size_bytes: Option<usize>,
    pub retry_count: u32,

    pub status: EmailStatus,

    // First-occurrence timestamps, each set at most once
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub complained_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,

    pub error_message: Option<String>,
}

/// Attributes for creating a log at send time.
#[derive(Debug, Clone, Default)]
pub struct NewEmailLog {
    pub message_id: Option<String>,
    pub to: String,
    pub from: String,
    pub subject: String,
    pub provider: String,
    pub template_name: Option<String>,
    pub campaign_id: Option<String>,
    pub size_bytes: Option<usize>,
}

/// Kind-specific detail carried by an audit event.
///
/// Flat optional fields rather than one struct per kind: the set is small
/// and a single shape keeps the audit trail uniform for storage and export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventDetail {
    pub bounce_type: Option<String>,
    pub bounce_sub_type: Option<String>,
    pub diagnostic_codes: Vec<String>,
    pub recipients: Vec<String>,
    pub feedback_type: Option<String>,
    pub reject_reason: Option<String>,
    pub delay_type: Option<String>,
    pub subscription_type: Option<String>,
    pub failure_reason: Option<String>,
    pub link: Option<String>,
    pub link_tags: Option<String>,
    pub user_agent: Option<String>,
    pub source_ip: Option<String>,
    pub smtp_response: Option<String>,
}

/// A provider notification mapped into the internal shape, ready for
/// correlation and application to a log.
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub kind: EventKind,
    /// `mail.messageId` from the provider payload; the correlation key
    pub mail_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub detail: EventDetail,
}

/// Append-only audit record, one per successfully correlated notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailEvent {
    pub id: Uuid,
    pub log_id: i64,
    pub event_type: EventKind,
    pub occurred_at: DateTime<Utc>,
    pub detail: EventDetail,
    pub recorded_at: DateTime<Utc>,
}

impl EmailEvent {
    /// Build the audit row for a normalized event applied to `log_id`.
    pub fn from_normalized(log_id: i64, event: &NormalizedEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            log_id,
            event_type: event.kind.clone(),
            occurred_at: event.occurred_at,
            detail: event.detail.clone(),
            recorded_at: Utc::now(),
        }
    }
}
