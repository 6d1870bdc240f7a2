//! Webhook security gate.
//!
//! Every inbound delivery passes the same checks in a fixed fail-fast
//! order, each independently toggleable by configuration:
//!
//! 1. payload size        → 413
//! 2. per-IP rate limit   → 429
//! 3. source-IP allowlist → 403
//! 4. timestamp freshness → 400 (replay protection)
//! 5. envelope shape      → 400
//! 6. SNS signature       → 403
//!
//! Checks 1-3 run before the body is parsed (`check_transport`); 4-6 need
//! the decoded envelope (`check_envelope`). The handler calls them in that
//! order, so a request failing an early check is never parsed further.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::Config;
use crate::process::SnsEnvelope;
use crate::web::errors::WebhookError;
use crate::web::rate_limit::RateLimiter;
use crate::web::signature::SignatureVerifier;

pub struct SecurityGate {
    config: Arc<Config>,
    limiter: RateLimiter,
    verifier: SignatureVerifier,
    allowed: Vec<Cidr>,
}

impl SecurityGate {
    pub fn new(config: Arc<Config>, verifier: SignatureVerifier) -> Self {
        let allowed = config
            .allowed_cidrs
            .iter()
            .filter_map(|raw| match Cidr::parse(raw) {
                Some(cidr) => Some(cidr),
                None => {
                    warn!(cidr = %raw, "invalid_cidr_ignored");
                    None
                }
            })
            .collect();

        Self {
            limiter: RateLimiter::per_minute(config.rate_limit_per_minute),
            config,
            verifier,
            allowed,
        }
    }

    /// Checks 1-3: size, rate limit, source IP. Runs before body parsing.
    pub fn check_transport(
        &self,
        source_ip: Option<IpAddr>,
        body_len: usize,
    ) -> Result<(), WebhookError> {
        if body_len > self.config.max_payload_bytes {
            return Err(WebhookError::RequestTooLarge {
                size: body_len,
                max: self.config.max_payload_bytes,
            });
        }

        if self.config.rate_limit_enabled {
            if let Some(ip) = source_ip {
                if !self.limiter.check(ip) {
                    return Err(WebhookError::RateLimited);
                }
            }
        }

        if self.config.check_source_ip {
            let ip = source_ip
                .ok_or_else(|| WebhookError::InvalidSourceIp("unknown".to_string()))?;
            if !self.allowed.iter().any(|cidr| cidr.contains(ip)) {
                return Err(WebhookError::InvalidSourceIp(ip.to_string()));
            }
        }

        Ok(())
    }

    /// Checks 4-6: timestamp freshness, envelope shape, signature.
    pub async fn check_envelope(&self, envelope: &SnsEnvelope) -> Result<(), WebhookError> {
        let timestamp = envelope
            .timestamp
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .ok_or(WebhookError::InvalidTimestamp)?;

        let age_seconds = (Utc::now() - timestamp.with_timezone(&Utc))
            .num_seconds()
            .abs();
        if age_seconds > self.config.max_request_age_seconds {
            return Err(WebhookError::RequestTooOld {
                age_seconds,
                max_seconds: self.config.max_request_age_seconds,
            });
        }

        if envelope.kind.as_deref().unwrap_or_default().is_empty() {
            return Err(WebhookError::InvalidEnvelope);
        }

        if self.config.verify_signature {
            self.verifier.verify(envelope).await?;
        }

        Ok(())
    }
}

/// Minimal CIDR range over v4 or v6 addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: u128,
    prefix_len: u32,
    is_v4: bool,
}

impl Cidr {
    /// Parse "a.b.c.d/len" (or a v6 equivalent); a bare address is a full-
    /// length prefix.
    pub fn parse(raw: &str) -> Option<Self> {
        let (addr_part, len_part) = match raw.split_once('/') {
            Some((addr, len)) => (addr, Some(len)),
            None => (raw, None),
        };

        let addr: IpAddr = addr_part.trim().parse().ok()?;
        let (bits, max_len) = match addr {
            IpAddr::V4(v4) => (u32::from(v4) as u128, 32),
            IpAddr::V6(v6) => (u128::from(v6), 128),
        };

        let prefix_len = match len_part {
            Some(raw_len) => {
                let len: u32 = raw_len.trim().parse().ok()?;
                if len > max_len {
                    return None;
                }
                len
            }
            None => max_len,
        };

        let mask = prefix_mask(prefix_len, max_len);
        Some(Self {
            network: bits & mask,
            prefix_len,
            is_v4: addr.is_ipv4(),
        })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        let (bits, max_len, is_v4) = match ip {
            IpAddr::V4(v4) => (u32::from(v4) as u128, 32, true),
            IpAddr::V6(v6) => (u128::from(v6), 128, false),
        };

        if is_v4 != self.is_v4 {
            return false;
        }

        bits & prefix_mask(self.prefix_len, max_len) == self.network
    }
}

fn prefix_mask(prefix_len: u32, max_len: u32) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        (!0u128) << (max_len - prefix_len) & mask_for(max_len)
    }
}

fn mask_for(max_len: u32) -> u128 {
    if max_len == 128 {
        !0u128
    } else {
        (1u128 << max_len) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate_config() -> Config {
        let mut config = Config::from_env();
        config.max_payload_bytes = 50_000;
        config.max_request_age_seconds = 300;
        config.verify_signature = false;
        config.check_source_ip = false;
        config.rate_limit_enabled = false;
        config
    }

    fn gate(config: Config) -> SecurityGate {
        SecurityGate::new(Arc::new(config), SignatureVerifier::new())
    }

    fn fresh_envelope() -> SnsEnvelope {
        SnsEnvelope {
            kind: Some("Notification".to_string()),
            timestamp: Some(Utc::now().to_rfc3339()),
            ..Default::default()
        }
    }

    #[test]
    fn test_cidr_v4_containment() {
        let cidr = Cidr::parse("54.240.0.0/18").unwrap();

        assert!(cidr.contains("54.240.10.20".parse().unwrap()));
        assert!(!cidr.contains("54.241.0.1".parse().unwrap()));
        assert!(!cidr.contains("203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn test_cidr_bare_address() {
        let cidr = Cidr::parse("203.0.113.9").unwrap();

        assert!(cidr.contains("203.0.113.9".parse().unwrap()));
        assert!(!cidr.contains("203.0.113.10".parse().unwrap()));
    }

    #[test]
    fn test_cidr_rejects_garbage() {
        assert!(Cidr::parse("not-an-ip/8").is_none());
        assert!(Cidr::parse("10.0.0.0/33").is_none());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let gate = gate(gate_config());

        let err = gate.check_transport(None, 60_000).unwrap_err();
        assert!(matches!(err, WebhookError::RequestTooLarge { .. }));
    }

    #[test]
    fn test_size_check_wins_over_ip_check() {
        let mut config = gate_config();
        config.check_source_ip = true;
        config.allowed_cidrs = vec!["54.240.0.0/18".to_string()];
        let gate = gate(config);

        // Disallowed IP AND oversized: fail-fast ordering is fixed
        let err = gate
            .check_transport(Some("203.0.113.9".parse().unwrap()), 60_000)
            .unwrap_err();
        assert!(matches!(err, WebhookError::RequestTooLarge { .. }));
    }

    #[test]
    fn test_disallowed_ip_rejected() {
        let mut config = gate_config();
        config.check_source_ip = true;
        config.allowed_cidrs = vec!["54.240.0.0/18".to_string()];
        let gate = gate(config);

        assert!(gate
            .check_transport(Some("54.240.1.1".parse().unwrap()), 100)
            .is_ok());

        let err = gate
            .check_transport(Some("203.0.113.9".parse().unwrap()), 100)
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSourceIp(_)));
    }

    #[test]
    fn test_ip_check_with_unknown_source_rejected() {
        let mut config = gate_config();
        config.check_source_ip = true;
        let gate = gate(config);

        let err = gate.check_transport(None, 100).unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSourceIp(_)));
    }

    #[test]
    fn test_rate_limit_enforced() {
        let mut config = gate_config();
        config.rate_limit_enabled = true;
        config.rate_limit_per_minute = 2;
        let gate = gate(config);
        let ip = Some("198.51.100.7".parse().unwrap());

        assert!(gate.check_transport(ip, 100).is_ok());
        assert!(gate.check_transport(ip, 100).is_ok());
        assert!(matches!(
            gate.check_transport(ip, 100).unwrap_err(),
            WebhookError::RateLimited
        ));
    }

    #[tokio::test]
    async fn test_fresh_envelope_passes() {
        let gate = gate(gate_config());

        assert!(gate.check_envelope(&fresh_envelope()).await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_timestamp_rejected() {
        let gate = gate(gate_config());

        let mut envelope = fresh_envelope();
        envelope.timestamp =
            Some((Utc::now() - chrono::Duration::minutes(10)).to_rfc3339());

        let err = gate.check_envelope(&envelope).await.unwrap_err();
        assert!(matches!(err, WebhookError::RequestTooOld { .. }));
    }

    #[tokio::test]
    async fn test_missing_timestamp_rejected() {
        let gate = gate(gate_config());

        let mut envelope = fresh_envelope();
        envelope.timestamp = None;

        let err = gate.check_envelope(&envelope).await.unwrap_err();
        assert!(matches!(err, WebhookError::InvalidTimestamp));
    }

    #[tokio::test]
    async fn test_unparseable_timestamp_rejected() {
        let gate = gate(gate_config());

        let mut envelope = fresh_envelope();
        envelope.timestamp = Some("yesterday at noon".to_string());

        let err = gate.check_envelope(&envelope).await.unwrap_err();
        assert!(matches!(err, WebhookError::InvalidTimestamp));
    }

    #[tokio::test]
    async fn test_missing_type_rejected() {
        let gate = gate(gate_config());

        let mut envelope = fresh_envelope();
        envelope.kind = None;

        let err = gate.check_envelope(&envelope).await.unwrap_err();
        assert!(matches!(err, WebhookError::InvalidEnvelope));
    }

    #[tokio::test]
    async fn test_signature_required_when_enabled() {
        let mut config = gate_config();
        config.verify_signature = true;
        let gate = gate(config);

        // No SigningCertURL on the envelope
        let err = gate.check_envelope(&fresh_envelope()).await.unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature(_)));
    }
}
