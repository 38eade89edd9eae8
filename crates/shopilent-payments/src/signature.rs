//! HMAC-SHA256 webhook signatures.
//!
//! Header format: `t=<unix seconds>,v1=<hex>[,v1=<hex>...]`. The signed
//! content is `"{t}." + raw body`. Several `v1` entries may be present while
//! a provider rotates secrets; any one matching is enough.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use shopilent_core::ShopilentError;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature header is empty")]
    EmptyHeader,

    #[error("signature header has no timestamp")]
    MissingTimestamp,

    #[error("signature header has no v1 signature")]
    MissingSignature,

    #[error("malformed signature header: {0}")]
    Malformed(String),

    #[error("signature does not match payload")]
    Mismatch,

    #[error("timestamp {timestamp} is outside the {tolerance_secs}s tolerance window")]
    OutsideTolerance { timestamp: i64, tolerance_secs: u64 },
}

impl From<SignatureError> for ShopilentError {
    fn from(err: SignatureError) -> Self {
        ShopilentError::Unauthorized(format!("webhook signature rejected: {err}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let header = header.trim();
        if header.is_empty() {
            return Err(SignatureError::EmptyHeader);
        }

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or_else(|| SignatureError::Malformed(format!("'{part}' is not key=value")))?;
            match key {
                "t" => {
                    let parsed = value
                        .parse::<i64>()
                        .map_err(|_| SignatureError::Malformed(format!("bad timestamp '{value}'")))?;
                    timestamp = Some(parsed);
                }
                "v1" => {
                    let bytes = hex::decode(value)
                        .map_err(|_| SignatureError::Malformed("v1 signature is not hex".into()))?;
                    signatures.push(bytes);
                }
                // v0 test-mode signatures and unknown schemes are ignored.
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
        if signatures.is_empty() {
            return Err(SignatureError::MissingSignature);
        }
        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

/// Verifies signed webhook deliveries for one provider secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"<redacted>")
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl AsRef<[u8]>, tolerance: Duration) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            tolerance,
        }
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> HmacSha256 {
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC accepts keys of any length"),
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac
    }

    /// Check authenticity first, then freshness. Comparison is constant time.
    pub fn verify(
        &self,
        payload: &[u8],
        header: &str,
        now: DateTime<Utc>,
    ) -> Result<SignatureHeader, SignatureError> {
        let parsed = SignatureHeader::parse(header)?;
        let mac = self.mac(parsed.timestamp, payload);
        let matched = parsed
            .signatures
            .iter()
            .any(|candidate| mac.clone().verify_slice(candidate).is_ok());
        if !matched {
            return Err(SignatureError::Mismatch);
        }

        let age = now.timestamp().abs_diff(parsed.timestamp);
        if age > self.tolerance.as_secs() {
            return Err(SignatureError::OutsideTolerance {
                timestamp: parsed.timestamp,
                tolerance_secs: self.tolerance.as_secs(),
            });
        }
        Ok(parsed)
    }

    /// Hex signature for `payload` at `timestamp`.
    pub fn compute(&self, timestamp: i64, payload: &[u8]) -> String {
        hex::encode(self.mac(timestamp, payload).finalize().into_bytes())
    }

    /// Full header value as a provider would send it.
    pub fn sign(&self, timestamp: i64, payload: &[u8]) -> String {
        format!("t={},v1={}", timestamp, self.compute(timestamp, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(SECRET, Duration::from_secs(300))
    }

    #[test]
    fn valid_signature_is_accepted() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let now = Utc::now();
        let header = verifier().sign(now.timestamp(), payload);

        let parsed = verifier().verify(payload, &header, now).unwrap();
        assert_eq!(parsed.timestamp, now.timestamp());
    }

    #[test]
    fn tampered_payload_fails() {
        let original = br#"{"type":"payment_intent.succeeded","amount":100}"#;
        let tampered = br#"{"type":"payment_intent.succeeded","amount":1}"#;
        let now = Utc::now();
        let header = verifier().sign(now.timestamp(), original);

        assert_eq!(
            verifier().verify(tampered, &header, now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn wrong_secret_fails() {
        let payload = br#"{}"#;
        let now = Utc::now();
        let header = WebhookVerifier::new("other", Duration::from_secs(300)).sign(now.timestamp(), payload);
        assert_eq!(
            verifier().verify(payload, &header, now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn stale_and_future_timestamps_fail() {
        let payload = br#"{}"#;
        let now = Utc::now();

        let old = verifier().sign(now.timestamp() - 600, payload);
        assert!(matches!(
            verifier().verify(payload, &old, now),
            Err(SignatureError::OutsideTolerance { .. })
        ));

        let future = verifier().sign(now.timestamp() + 600, payload);
        assert!(matches!(
            verifier().verify(payload, &future, now),
            Err(SignatureError::OutsideTolerance { .. })
        ));

        let edge = verifier().sign(now.timestamp() - 300, payload);
        assert!(verifier().verify(payload, &edge, now).is_ok());
    }

    #[test]
    fn any_matching_v1_is_enough() {
        let payload = br#"{}"#;
        let now = Utc::now();
        let good = verifier().compute(now.timestamp(), payload);
        let header = format!("t={},v1={},v1={}", now.timestamp(), "00".repeat(32), good);
        assert!(verifier().verify(payload, &header, now).is_ok());
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert_eq!(SignatureHeader::parse(""), Err(SignatureError::EmptyHeader));
        assert_eq!(
            SignatureHeader::parse("v1=abcd"),
            Err(SignatureError::MissingTimestamp)
        );
        assert_eq!(
            SignatureHeader::parse("t=1234567890"),
            Err(SignatureError::MissingSignature)
        );
        assert!(matches!(
            SignatureHeader::parse("garbage"),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            SignatureHeader::parse("t=1,v1=not-hex"),
            Err(SignatureError::Malformed(_))
        ));
    }

    #[test]
    fn converts_to_unauthorized() {
        let err: ShopilentError = SignatureError::Mismatch.into();
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn debug_output_hides_secret() {
        assert!(!format!("{:?}", verifier()).contains(SECRET));
    }
}
