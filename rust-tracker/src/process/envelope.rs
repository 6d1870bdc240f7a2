//! SNS envelope types and message classification.
//!
//! AWS SNS wraps every delivery in the same JSON envelope; the `Type` field
//! discriminates subscription handshakes from actual notifications, and the
//! inner `Message` field carries the SES event payload as a JSON string.

use serde::Deserialize;
use tracing::warn;

use super::event::SesEvent;
use super::ProcessError;

/// The raw SNS envelope.
///
/// Every field is optional: shape validation is the security gate's job and
/// happens field by field, after the cheap transport checks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnsEnvelope {
    #[serde(rename = "Type")]
    pub kind: Option<String>,
    #[serde(rename = "MessageId")]
    pub message_id: Option<String>,
    #[serde(rename = "TopicArn")]
    pub topic_arn: Option<String>,
    #[serde(rename = "Subject")]
    pub subject: Option<String>,
    #[serde(rename = "Message")]
    pub message: Option<String>,
    #[serde(rename = "Timestamp")]
    pub timestamp: Option<String>,
    #[serde(rename = "SignatureVersion")]
    pub signature_version: Option<String>,
    #[serde(rename = "Signature")]
    pub signature: Option<String>,
    #[serde(rename = "SigningCertURL")]
    pub signing_cert_url: Option<String>,
    #[serde(rename = "SubscribeURL")]
    pub subscribe_url: Option<String>,
    #[serde(rename = "Token")]
    pub token: Option<String>,
}

/// What an envelope asks of us.
#[derive(Debug)]
pub enum SnsMessage {
    /// Subscription handshake; the URL must be confirmed with a GET.
    Confirmation { subscribe_url: String },
    /// Topic unsubscribed; acknowledged, nothing else to do.
    Unsubscribed,
    /// A provider event notification with the decoded inner payload.
    Notification(Box<SesEvent>),
    /// Unrecognized `Type`; treated as a no-op success, never a failure.
    Ignored { kind: String },
}

/// Classify an envelope and decode the inner payload where one exists.
pub fn classify(envelope: &SnsEnvelope) -> Result<SnsMessage, ProcessError> {
    let kind = envelope.kind.as_deref().unwrap_or_default();

    match kind {
        "SubscriptionConfirmation" => match &envelope.subscribe_url {
            Some(url) if !url.is_empty() => Ok(SnsMessage::Confirmation {
                subscribe_url: url.clone(),
            }),
            _ => Err(ProcessError::MissingSubscribeUrl),
        },

        "UnsubscribeConfirmation" => Ok(SnsMessage::Unsubscribed),

        "Notification" => {
            let raw = envelope.message.as_deref().unwrap_or_default();
            let event: SesEvent =
                serde_json::from_str(raw).map_err(ProcessError::InvalidJson)?;
            Ok(SnsMessage::Notification(Box::new(event)))
        }

        other => {
            warn!(sns_type = %other, "sns_unknown_type");
            Ok(SnsMessage::Ignored {
                kind: other.to_string(),
            })
        }
    }
}
