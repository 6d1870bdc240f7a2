//! Configuration module for environment variable parsing.
//!
//! Reads all configuration from environment variables. The resulting struct
//! is injected into the gate, pipeline and sink at construction time; no
//! component reads the environment on its own.

use std::env;
use tracing::warn;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Master switch for the whole tracking pipeline
    pub tracking_enabled: bool,

    /// Switch for AWS SES event ingestion specifically
    pub ses_events_enabled: bool,

    /// Verify the SNS signature of inbound webhooks
    pub verify_signature: bool,

    /// Restrict inbound webhooks to the configured CIDR ranges
    pub check_source_ip: bool,

    /// CIDR ranges the notification provider sends from
    pub allowed_cidrs: Vec<String>,

    /// Enable the per-source-IP rate limiter
    pub rate_limit_enabled: bool,

    /// Requests allowed per source IP per minute
    pub rate_limit_per_minute: u32,

    /// Maximum accepted age of the envelope timestamp in seconds
    pub max_request_age_seconds: i64,

    /// Maximum accepted webhook payload size in bytes
    pub max_payload_bytes: usize,

    /// Overall deadline for processing one webhook request, in seconds
    pub handler_timeout_seconds: u64,

    /// Timeout for the SNS subscription-confirmation GET, in milliseconds
    pub confirm_timeout_ms: u64,

    // =========================================================================
    // Notification Sink (AMQP)
    // =========================================================================

    /// RabbitMQ connection URL; tracking updates are broadcast here when set
    pub amqp_url: Option<String>,

    /// Queue name for broadcast tracking updates
    pub tracking_queue: String,

    // =========================================================================
    // Outbound SMTP
    // =========================================================================

    /// SMTP relay host for the outbound mail transport
    pub smtp_host: Option<String>,

    /// SMTP credentials
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,

    /// Default From address for outbound mail
    pub smtp_from: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),

            tracking_enabled: parse_flag("TRACKING_ENABLED", true),

            ses_events_enabled: parse_flag("SES_EVENTS_ENABLED", true),

            verify_signature: parse_flag("VERIFY_SNS_SIGNATURE", true),

            check_source_ip: parse_flag("CHECK_SOURCE_IP", false),

            allowed_cidrs: parse_csv("ALLOWED_SOURCE_CIDRS").unwrap_or_default(),

            rate_limit_enabled: parse_flag("RATE_LIMIT_ENABLED", false),

            rate_limit_per_minute: env::var("RATE_LIMIT_PER_MINUTE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(120),

            max_request_age_seconds: env::var("MAX_REQUEST_AGE_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300), // 5 minutes default

            max_payload_bytes: env::var("MAX_PAYLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50_000),

            handler_timeout_seconds: env::var("HANDLER_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),

            confirm_timeout_ms: env::var("CONFIRM_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),

            amqp_url: env::var("AMQP_URL").ok(),

            tracking_queue: env::var("TRACKING_QUEUE")
                .unwrap_or_else(|_| "email_tracking".to_string()),

            smtp_host: env::var("SMTP_HOST").ok(),

            smtp_username: env::var("SMTP_USERNAME").ok(),

            smtp_password: env::var("SMTP_PASSWORD").ok(),

            smtp_from: env::var("SMTP_FROM").ok(),
        }
    }
}

/// Parse a boolean flag accepting "true"/"false", "1"/"0", "yes"/"no".
fn parse_flag(name: &str, default: bool) -> bool {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => {
            warn!(env_var = name, value = %raw, "Invalid flag value, using default");
            default
        }
    }
}

/// Parse a comma-separated list of strings.
fn parse_csv(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag_values() {
        env::set_var("TEST_FLAG", "yes");
        assert!(parse_flag("TEST_FLAG", false));
        env::set_var("TEST_FLAG", "0");
        assert!(!parse_flag("TEST_FLAG", true));
        env::set_var("TEST_FLAG", "banana");
        assert!(parse_flag("TEST_FLAG", true));
        env::remove_var("TEST_FLAG");
    }

    #[test]
    fn test_parse_flag_default() {
        assert!(parse_flag("NONEXISTENT_FLAG", true));
        assert!(!parse_flag("NONEXISTENT_FLAG", false));
    }

    #[test]
    fn test_parse_csv() {
        env::set_var("TEST_CIDRS", "54.240.0.0/18, 72.21.192.0/19");
        let result = parse_csv("TEST_CIDRS");
        assert_eq!(
            result,
            Some(vec![
                "54.240.0.0/18".to_string(),
                "72.21.192.0/19".to_string()
            ])
        );
        env::remove_var("TEST_CIDRS");
    }
}
