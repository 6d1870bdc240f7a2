//! SES event payload types and the event normalizer.
//!
//! Maps the provider-specific JSON (the inner `Message` of an SNS
//! notification) into the internal `NormalizedEvent` shape. There are no
//! official SDK types for these payloads; the structs below follow
//! https://docs.aws.amazon.com/ses/latest/dg/event-publishing-retrieving-sns-contents.html

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::track::{EventDetail, EventKind, NormalizedEvent};

/// Inner SES event payload.
///
/// `eventType` is the event-publishing discriminant; the older notification
/// format calls the same field `notificationType`, accepted as an alias.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesEvent {
    #[serde(default, alias = "notificationType")]
    pub event_type: Option<String>,
    pub mail: Option<SesMail>,
    pub bounce: Option<SesBounce>,
    pub complaint: Option<SesComplaint>,
    pub delivery: Option<SesDelivery>,
    pub reject: Option<SesReject>,
    pub open: Option<SesOpen>,
    pub click: Option<SesClick>,
    pub delivery_delay: Option<SesDeliveryDelay>,
    pub subscription: Option<SesSubscription>,
    /// Rendering-failure detail; SES nests it under `failure`
    pub failure: Option<SesRenderingFailure>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesMail {
    pub message_id: Option<String>,
    pub timestamp: Option<String>,
    pub source: Option<String>,
    #[serde(default)]
    pub destination: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesBounce {
    pub bounce_type: Option<String>,
    pub bounce_sub_type: Option<String>,
    #[serde(default)]
    pub bounced_recipients: Vec<SesBouncedRecipient>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesBouncedRecipient {
    pub email_address: Option<String>,
    pub action: Option<String>,
    pub status: Option<String>,
    pub diagnostic_code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesComplaint {
    pub complaint_feedback_type: Option<String>,
    #[serde(default)]
    pub complained_recipients: Vec<SesComplainedRecipient>,
    pub timestamp: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesComplainedRecipient {
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesDelivery {
    pub timestamp: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub smtp_response: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesReject {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesOpen {
    pub timestamp: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesClick {
    pub timestamp: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub link: Option<String>,
    pub link_tags: Option<HashMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesDeliveryDelay {
    pub delay_type: Option<String>,
    pub timestamp: Option<String>,
    #[serde(default)]
    pub delayed_recipients: Vec<SesBouncedRecipient>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesSubscription {
    pub contact_list: Option<String>,
    pub source: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SesRenderingFailure {
    pub error_message: Option<String>,
    pub template_name: Option<String>,
}

/// Map a decoded SES event into the internal shape.
///
/// The correlation key is `mail.messageId`. `occurred_at` prefers the
/// kind-specific timestamp, falls back to the mail timestamp, then to now.
pub fn normalize(event: &SesEvent) -> NormalizedEvent {
    let kind = EventKind::parse(event.event_type.as_deref().unwrap_or_default());
    let mail_id = event
        .mail
        .as_ref()
        .and_then(|m| m.message_id.clone())
        .filter(|id| !id.is_empty());

    let (detail, event_timestamp) = extract_detail(&kind, event);

    let occurred_at = event_timestamp
        .as_deref()
        .or_else(|| event.mail.as_ref().and_then(|m| m.timestamp.as_deref()))
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);

    NormalizedEvent {
        kind,
        mail_id,
        occurred_at,
        detail,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Kind-specific detail extraction, plus the kind's own timestamp.
fn extract_detail(kind: &EventKind, event: &SesEvent) -> (EventDetail, Option<String>) {
    let mut detail = EventDetail::default();

    let timestamp = match kind {
        EventKind::Bounce => {
            let bounce = event.bounce.clone().unwrap_or_default();
            detail.bounce_type = bounce.bounce_type;
            detail.bounce_sub_type = bounce.bounce_sub_type;
            detail.recipients = bounce
                .bounced_recipients
                .iter()
                .filter_map(|r| r.email_address.clone())
                .collect();
            detail.diagnostic_codes = bounce
                .bounced_recipients
                .iter()
                .filter_map(|r| r.diagnostic_code.clone())
                .collect();
            bounce.timestamp
        }

        EventKind::Complaint => {
            let complaint = event.complaint.clone().unwrap_or_default();
            detail.feedback_type = complaint.complaint_feedback_type;
            detail.user_agent = complaint.user_agent;
            detail.recipients = complaint
                .complained_recipients
                .iter()
                .filter_map(|r| r.email_address.clone())
                .collect();
            complaint.timestamp
        }

        EventKind::Delivery => {
            let delivery = event.delivery.clone().unwrap_or_default();
            detail.recipients = delivery.recipients;
            detail.smtp_response = delivery.smtp_response;
            delivery.timestamp
        }

        EventKind::Reject => {
            detail.reject_reason = event.reject.as_ref().and_then(|r| r.reason.clone());
            None
        }

        EventKind::Open => {
            let open = event.open.clone().unwrap_or_default();
            detail.source_ip = open.ip_address;
            detail.user_agent = open.user_agent;
            open.timestamp
        }

        EventKind::Click => {
            let click = event.click.clone().unwrap_or_default();
            detail.source_ip = click.ip_address;
            detail.user_agent = click.user_agent;
            detail.link = click.link;
            detail.link_tags = click
                .link_tags
                .as_ref()
                .and_then(|tags| serde_json::to_string(tags).ok());
            click.timestamp
        }

        EventKind::DeliveryDelay => {
            let delay = event.delivery_delay.clone().unwrap_or_default();
            detail.delay_type = delay.delay_type;
            detail.recipients = delay
                .delayed_recipients
                .iter()
                .filter_map(|r| r.email_address.clone())
                .collect();
            delay.timestamp
        }

        EventKind::Subscription => {
            let subscription = event.subscription.clone().unwrap_or_default();
            detail.subscription_type = subscription.contact_list;
            subscription.timestamp
        }

        EventKind::RenderingFailure => {
            detail.failure_reason = event
                .failure
                .as_ref()
                .and_then(|f| f.error_message.clone());
            None
        }

        EventKind::Send | EventKind::Unknown(_) => None,
    };

    (detail, timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_permanent_bounce() {
        let raw = r#"{
            "eventType": "Bounce",
            "bounce": {
                "bounceType": "Permanent",
                "bounceSubType": "General",
                "bouncedRecipients": [{
                    "emailAddress": "gone@example.com",
                    "action": "failed",
                    "status": "5.1.1",
                    "diagnosticCode": "smtp; 550 5.1.1 user unknown"
                }],
                "timestamp": "2024-03-01T12:00:00.000Z"
            },
            "mail": {
                "timestamp": "2024-03-01T11:59:58.000Z",
                "messageId": "abc123",
                "source": "noreply@example.com",
                "destination": ["gone@example.com"]
            }
        }"#;

        let event: SesEvent = serde_json::from_str(raw).unwrap();
        let normalized = normalize(&event);

        assert_eq!(normalized.kind, EventKind::Bounce);
        assert_eq!(normalized.mail_id.as_deref(), Some("abc123"));
        assert_eq!(normalized.detail.bounce_type.as_deref(), Some("Permanent"));
        assert_eq!(normalized.detail.recipients, vec!["gone@example.com"]);
        assert_eq!(
            normalized.detail.diagnostic_codes,
            vec!["smtp; 550 5.1.1 user unknown"]
        );
        assert_eq!(normalized.occurred_at.to_rfc3339(), "2024-03-01T12:00:00+00:00");
    }

    #[test]
    fn test_normalize_click_with_link_tags() {
        let raw = r#"{
            "eventType": "Click",
            "click": {
                "timestamp": "2024-03-01T12:05:00.000Z",
                "ipAddress": "203.0.113.9",
                "userAgent": "Mozilla/5.0",
                "link": "https://example.com/offer",
                "linkTags": {"campaign": ["spring"]}
            },
            "mail": {"messageId": "abc123"}
        }"#;

        let event: SesEvent = serde_json::from_str(raw).unwrap();
        let normalized = normalize(&event);

        assert_eq!(normalized.kind, EventKind::Click);
        assert_eq!(
            normalized.detail.link.as_deref(),
            Some("https://example.com/offer")
        );
        assert!(normalized.detail.link_tags.as_deref().unwrap().contains("spring"));
    }

    #[test]
    fn test_normalize_legacy_notification_type_field() {
        let raw = r#"{
            "notificationType": "Delivery",
            "delivery": {
                "timestamp": "2024-03-01T12:00:05.000Z",
                "recipients": ["to@example.com"],
                "smtpResponse": "250 2.0.0 OK"
            },
            "mail": {"messageId": "abc123"}
        }"#;

        let event: SesEvent = serde_json::from_str(raw).unwrap();
        let normalized = normalize(&event);

        assert_eq!(normalized.kind, EventKind::Delivery);
        assert_eq!(
            normalized.detail.smtp_response.as_deref(),
            Some("250 2.0.0 OK")
        );
    }

    #[test]
    fn test_normalize_unknown_kind_keeps_raw_name() {
        let raw = r#"{"eventType": "FutureThing", "mail": {"messageId": "abc123"}}"#;

        let event: SesEvent = serde_json::from_str(raw).unwrap();
        let normalized = normalize(&event);

        assert_eq!(
            normalized.kind,
            EventKind::Unknown("FutureThing".to_string())
        );
        assert_eq!(normalized.mail_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_normalize_missing_mail_id() {
        let raw = r#"{"eventType": "Delivery", "delivery": {}}"#;

        let event: SesEvent = serde_json::from_str(raw).unwrap();
        let normalized = normalize(&event);

        assert!(normalized.mail_id.is_none());
    }

    #[test]
    fn test_normalize_falls_back_to_mail_timestamp() {
        let raw = r#"{
            "eventType": "Reject",
            "reject": {"reason": "Bad content"},
            "mail": {"messageId": "abc123", "timestamp": "2024-03-01T10:00:00.000Z"}
        }"#;

        let event: SesEvent = serde_json::from_str(raw).unwrap();
        let normalized = normalize(&event);

        assert_eq!(normalized.detail.reject_reason.as_deref(), Some("Bad content"));
        assert_eq!(normalized.occurred_at.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn test_normalize_rendering_failure() {
        let raw = r#"{
            "eventType": "Rendering Failure",
            "failure": {"errorMessage": "Attribute 'name' is not present", "templateName": "welcome"},
            "mail": {"messageId": "abc123"}
        }"#;

        let event: SesEvent = serde_json::from_str(raw).unwrap();
        let normalized = normalize(&event);

        assert_eq!(normalized.kind, EventKind::RenderingFailure);
        assert!(normalized
            .detail
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("not present"));
    }
}
