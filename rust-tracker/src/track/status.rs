//! Status state machine.
//!
//! Applies a normalized provider event to a log record. Pure functions; the
//! store runs them inside its atomic ingest so two racing notifications for
//! the same log resolve deterministically by precedence.

use chrono::{DateTime, Utc};

use super::log::{EmailLog, EmailStatus, EventDetail, EventKind, NormalizedEvent};

/// Result of applying one event to a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub previous: EmailStatus,
    pub status_changed: bool,
}

/// Status a given event kind drives the log toward, if any.
///
/// `subscription` and unknown kinds are audit-only. Bounce class comes from
/// the provider's bounce type: `Permanent` is a hard bounce, `Transient` a
/// soft bounce, anything else the generic `bounced`.
pub fn candidate_status(kind: &EventKind, detail: &EventDetail) -> Option<EmailStatus> {
    match kind {
        EventKind::Send => Some(EmailStatus::Sent),
        EventKind::Delivery => Some(EmailStatus::Delivered),
        EventKind::Bounce => Some(match detail.bounce_type.as_deref() {
            Some("Permanent") => EmailStatus::HardBounced,
            Some("Transient") => EmailStatus::SoftBounced,
            _ => EmailStatus::Bounced,
        }),
        EventKind::Complaint => Some(EmailStatus::Complaint),
        EventKind::Open => Some(EmailStatus::Opened),
        EventKind::Click => Some(EmailStatus::Clicked),
        EventKind::Reject => Some(EmailStatus::Rejected),
        EventKind::DeliveryDelay => Some(EmailStatus::Delayed),
        EventKind::RenderingFailure => Some(EmailStatus::Failed),
        EventKind::Subscription | EventKind::Unknown(_) => None,
    }
}

/// Apply a normalized event to a log record.
///
/// Rules:
/// - the status is overwritten unless the current status outranks the
///   incoming one, so a late `delivery` never downgrades a `bounced` log;
/// - per-kind timestamps are set only when currently unset (first
///   occurrence wins), regardless of whether the status moved;
/// - error detail is recorded when the incoming status is accepted.
///
/// The caller appends the audit row for every event, accepted or not.
pub fn apply_event(log: &mut EmailLog, event: &NormalizedEvent) -> ApplyOutcome {
    let previous = log.status;

    if let Some(candidate) = candidate_status(&event.kind, &event.detail) {
        if candidate.precedence_rank() >= log.status.precedence_rank() {
            log.status = candidate;
            if let Some(error) = error_detail(&event.kind, &event.detail) {
                log.error_message = Some(error);
            }
        }
    }

    stamp_first_occurrence(log, &event.kind, event.occurred_at);

    ApplyOutcome {
        previous,
        status_changed: log.status != previous,
    }
}

/// Set the per-kind summary timestamp if this is the first event of its kind.
fn stamp_first_occurrence(log: &mut EmailLog, kind: &EventKind, at: DateTime<Utc>) {
    let slot = match kind {
        EventKind::Send => &mut log.sent_at,
        EventKind::Delivery => &mut log.delivered_at,
        EventKind::Bounce => &mut log.bounced_at,
        EventKind::Complaint => &mut log.complained_at,
        EventKind::Open => &mut log.opened_at,
        EventKind::Click => &mut log.clicked_at,
        _ => return,
    };

    if slot.is_none() {
        *slot = Some(at);
    }
}

/// Human-readable error detail for failure-class events.
fn error_detail(kind: &EventKind, detail: &EventDetail) -> Option<String> {
    match kind {
        EventKind::Bounce => {
            let class = detail.bounce_type.as_deref().unwrap_or("unknown");
            let sub = detail.bounce_sub_type.as_deref().unwrap_or("unknown");
            let diagnostic = detail
                .diagnostic_codes
                .first()
                .map(|d| format!(": {}", d))
                .unwrap_or_default();
            Some(format!("bounce {}/{}{}", class, sub, diagnostic))
        }
        EventKind::Reject => Some(
            detail
                .reject_reason
                .clone()
                .unwrap_or_else(|| "rejected".to_string()),
        ),
        EventKind::RenderingFailure => Some(
            detail
                .failure_reason
                .clone()
                .unwrap_or_else(|| "rendering failure".to_string()),
        ),
        _ => None,
    }
}
