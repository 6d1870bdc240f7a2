//! SMTP transport backed by lettre.
//!
//! The relay, credentials and default From address come from config. The
//! transport issues its own provider message id; SMTP relays do not return
//! one in the accept response.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{
        header::{ContentType, Header, HeaderName, HeaderValue},
        MultiPart,
    },
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use uuid::Uuid;

use super::{MailTransport, OutgoingEmail, ProviderResponse, CORRELATION_HEADER};
use crate::config::Config;

/// Typed rendition of the correlation header for lettre's header table.
#[derive(Debug, Clone)]
struct CorrelationHeader(String);

impl Header for CorrelationHeader {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str(CORRELATION_HEADER)
    }

    fn parse(s: &str) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

pub struct SmtpMailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    default_from: Option<String>,
}

impl SmtpMailTransport {
    /// Build a relay transport from config; requires `SMTP_HOST`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let host = config
            .smtp_host
            .as_deref()
            .context("SMTP_HOST is not configured")?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .context("Failed to build SMTP relay")?;

        if let (Some(user), Some(pass)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            default_from: config.smtp_from.clone(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    fn provider(&self) -> &str {
        "smtp"
    }

    async fn deliver(&self, email: &OutgoingEmail) -> Result<ProviderResponse> {
        let mut email = email.clone();
        if email.from.is_empty() {
            email.from = self
                .default_from
                .clone()
                .context("No From address on message and SMTP_FROM unset")?;
        }

        let message_id = format!("{}@sestrack", Uuid::new_v4());
        let message = build_message(&email, &message_id)?;

        self.mailer
            .send(message)
            .await
            .context("SMTP delivery failed")?;

        Ok(ProviderResponse {
            message_id,
            aws_message_id: None,
        })
    }
}

/// Assemble the lettre message: addressing, correlation header, body parts.
fn build_message(email: &OutgoingEmail, message_id: &str) -> Result<Message> {
    let mut builder = Message::builder()
        .from(email.from.parse().context("Invalid From address")?)
        .to(email.to.parse().context("Invalid To address")?)
        .subject(email.subject.clone())
        .message_id(Some(format!("<{}>", message_id)));

    if let Some(log_id) = email
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(CORRELATION_HEADER))
        .map(|(_, value)| value.clone())
    {
        builder = builder.header(CorrelationHeader(log_id));
    }

    let message = match (&email.body_text, &email.body_html) {
        (Some(text), Some(html)) => builder.multipart(MultiPart::alternative_plain_html(
            text.clone(),
            html.clone(),
        ))?,
        (None, Some(html)) => builder
            .header(ContentType::TEXT_HTML)
            .body(html.clone())?,
        (Some(text), None) => builder.body(text.clone())?,
        (None, None) => builder.body(String::new())?,
    };

    Ok(message)
}
