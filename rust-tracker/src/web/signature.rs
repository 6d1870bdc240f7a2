//! SNS webhook signature verification.
//!
//! SNS signs each delivery with the private key of a certificate published
//! at `SigningCertURL`. Verification: restrict the cert URL to AWS SNS
//! endpoints, fetch and cache the PEM, rebuild the canonical string for the
//! message type and check the RSA signature (`SignatureVersion` 1 = SHA1,
//! 2 = SHA256).
//! Reference: https://docs.aws.amazon.com/sns/latest/dg/sns-verify-signature-of-message.html

use std::collections::HashMap;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use openssl::hash::MessageDigest;
use openssl::sign::Verifier;
use openssl::x509::X509;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use url::Url;

use crate::process::SnsEnvelope;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("envelope is missing {0}")]
    MissingField(&'static str),

    #[error("unsupported SignatureVersion {0:?}")]
    UnsupportedVersion(String),

    #[error("signing cert URL rejected: {0}")]
    CertUrlRejected(String),

    #[error("failed to fetch signing cert: {0}")]
    CertFetch(String),

    #[error("signature is not valid base64")]
    BadEncoding,

    #[error("crypto failure: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    #[error("signature does not match")]
    Mismatch,
}

/// Verifies SNS envelope signatures, caching fetched certificates by URL.
pub struct SignatureVerifier {
    http: reqwest::Client,
    cache: RwLock<HashMap<String, Vec<u8>>>,
}

impl SignatureVerifier {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            http,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Verify the envelope's signature against its published certificate.
    pub async fn verify(&self, envelope: &SnsEnvelope) -> Result<(), SignatureError> {
        let cert_url = envelope
            .signing_cert_url
            .as_deref()
            .ok_or(SignatureError::MissingField("SigningCertURL"))?;

        check_cert_url(cert_url)?;

        let pem = self.fetch_cert(cert_url).await?;
        verify_with_cert(&pem, envelope)
    }

    async fn fetch_cert(&self, cert_url: &str) -> Result<Vec<u8>, SignatureError> {
        {
            let cache = self.cache.read().await;
            if let Some(pem) = cache.get(cert_url) {
                return Ok(pem.clone());
            }
        }

        let response = self
            .http
            .get(cert_url)
            .send()
            .await
            .map_err(|e| SignatureError::CertFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SignatureError::CertFetch(format!(
                "status {}",
                response.status()
            )));
        }

        let pem = response
            .bytes()
            .await
            .map_err(|e| SignatureError::CertFetch(e.to_string()))?
            .to_vec();

        info!(cert_url_length = cert_url.len(), "sns_cert_fetched");

        let mut cache = self.cache.write().await;
        cache.insert(cert_url.to_string(), pem.clone());

        Ok(pem)
    }
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Only HTTPS URLs on AWS SNS hosts are acceptable certificate sources.
pub(crate) fn check_cert_url(raw: &str) -> Result<(), SignatureError> {
    let url = Url::parse(raw).map_err(|e| SignatureError::CertUrlRejected(e.to_string()))?;

    if url.scheme() != "https" {
        return Err(SignatureError::CertUrlRejected(format!(
            "scheme {} is not https",
            url.scheme()
        )));
    }

    let host = url.host_str().unwrap_or_default();
    if !(host.starts_with("sns.") && host.ends_with(".amazonaws.com")) {
        warn!(host = %host, "sns_cert_host_rejected");
        return Err(SignatureError::CertUrlRejected(format!(
            "host {} is not an SNS endpoint",
            host
        )));
    }

    Ok(())
}

/// Verify an envelope against an already-fetched PEM certificate.
pub(crate) fn verify_with_cert(
    pem: &[u8],
    envelope: &SnsEnvelope,
) -> Result<(), SignatureError> {
    let digest = match envelope.signature_version.as_deref() {
        Some("1") => MessageDigest::sha1(),
        Some("2") => MessageDigest::sha256(),
        Some(other) => return Err(SignatureError::UnsupportedVersion(other.to_string())),
        None => return Err(SignatureError::MissingField("SignatureVersion")),
    };

    let signature = envelope
        .signature
        .as_deref()
        .ok_or(SignatureError::MissingField("Signature"))?;

    // SNS wraps the base64 signature; strip whitespace before decoding
    let compact: String = signature.split_whitespace().collect();
    let signature = BASE64
        .decode(compact.as_bytes())
        .map_err(|_| SignatureError::BadEncoding)?;

    let canonical = canonical_string(envelope)?;

    let cert = X509::from_pem(pem)?;
    let public_key = cert.public_key()?;

    let mut verifier = Verifier::new(digest, &public_key)?;
    verifier.update(canonical.as_bytes())?;

    if verifier.verify(&signature)? {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Rebuild the signed canonical string for the envelope's message type.
///
/// `Notification` signs Message, MessageId, Subject (when present),
/// Timestamp, TopicArn and Type; the subscription handshakes additionally
/// sign SubscribeURL and Token. Each entry is `Name\nValue\n`.
pub(crate) fn canonical_string(envelope: &SnsEnvelope) -> Result<String, SignatureError> {
    let kind = envelope
        .kind
        .as_deref()
        .ok_or(SignatureError::MissingField("Type"))?;

    fn push_required<'a>(
        pairs: &mut Vec<(&'static str, &'a str)>,
        name: &'static str,
        value: &'a Option<String>,
    ) -> Result<(), SignatureError> {
        match value.as_deref() {
            Some(v) => {
                pairs.push((name, v));
                Ok(())
            }
            None => Err(SignatureError::MissingField(name)),
        }
    }

    let mut pairs: Vec<(&'static str, &str)> = Vec::new();

    match kind {
        "Notification" => {
            push_required(&mut pairs, "Message", &envelope.message)?;
            push_required(&mut pairs, "MessageId", &envelope.message_id)?;
            if let Some(subject) = envelope.subject.as_deref() {
                pairs.push(("Subject", subject));
            }
            push_required(&mut pairs, "Timestamp", &envelope.timestamp)?;
            push_required(&mut pairs, "TopicArn", &envelope.topic_arn)?;
        }
        _ => {
            push_required(&mut pairs, "Message", &envelope.message)?;
            push_required(&mut pairs, "MessageId", &envelope.message_id)?;
            push_required(&mut pairs, "SubscribeURL", &envelope.subscribe_url)?;
            push_required(&mut pairs, "Timestamp", &envelope.timestamp)?;
            push_required(&mut pairs, "Token", &envelope.token)?;
            push_required(&mut pairs, "TopicArn", &envelope.topic_arn)?;
        }
    }

    let mut canonical = String::new();
    for (name, value) in pairs {
        canonical.push_str(name);
        canonical.push('\n');
        canonical.push_str(value);
        canonical.push('\n');
    }
    canonical.push_str("Type\n");
    canonical.push_str(kind);
    canonical.push('\n');

    Ok(canonical)
}
