//! ElevenLabs webhook signature verification.
//!
//! The platform signs each delivery with HMAC-SHA256 and sends the result in
//! the `elevenlabs-signature` header as `t=<unix-seconds>,v0=<hex-digest>`.
//! The signed message is `"<t>.<raw body>"`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "elevenlabs-signature";

/// Prefix of the digest fragment, kept as part of the compared value.
const DIGEST_PREFIX: &str = "v0=";

/// Default freshness window for signature timestamps.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(30 * 60);

/// Outcome when verification cannot run because the secret or the header is
/// missing.
///
/// `FailOpen` accepts such requests. It is the default so that deployments
/// without a configured secret keep receiving calls; set `FailClosed` to
/// reject them instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingConfigPolicy {
    #[default]
    FailOpen,
    FailClosed,
}

impl MissingConfigPolicy {
    fn allows(self) -> bool {
        matches!(self, MissingConfigPolicy::FailOpen)
    }
}

/// Parsed `elevenlabs-signature` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureToken {
    /// Seconds since the Unix epoch
    pub timestamp: i64,
    /// Digest including its `v0=` prefix
    pub digest: String,
}

impl SignatureToken {
    /// Parse a header value. Fragment order is irrelevant and unknown
    /// fragments are ignored; both `t=` and `v0=` must be present.
    pub fn parse(header: &str) -> Option<Self> {
        let mut timestamp = None;
        let mut digest = None;

        for part in header.split(',').map(str::trim) {
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if part.starts_with(DIGEST_PREFIX) {
                digest = Some(part);
            }
        }

        let timestamp = timestamp?.parse::<i64>().ok()?;
        let digest = digest?.to_string();

        Some(Self { timestamp, digest })
    }
}

/// Verifies inbound webhook signatures against a shared secret.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secret: Option<String>,
    policy: MissingConfigPolicy,
    tolerance: Duration,
}

impl SignatureVerifier {
    pub fn new(secret: Option<String>, policy: MissingConfigPolicy) -> Self {
        Self {
            secret: secret.filter(|s| !s.trim().is_empty()),
            policy,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Verify a delivery against the current wall clock.
    pub fn verify(&self, raw_body: &[u8], signature_header: Option<&str>) -> bool {
        self.verify_at(raw_body, signature_header, now_millis())
    }

    /// Verify a delivery as if the current time were `now_ms` milliseconds
    /// since the epoch.
    pub fn verify_at(&self, raw_body: &[u8], signature_header: Option<&str>, now_ms: i64) -> bool {
        let header = signature_header.map(str::trim).filter(|h| !h.is_empty());

        let (secret, header) = match (self.secret.as_deref(), header) {
            (Some(secret), Some(header)) => (secret, header),
            (secret, header) => {
                let allowed = self.policy.allows();
                warn!(
                    has_secret = secret.is_some(),
                    has_signature = header.is_some(),
                    allowed = allowed,
                    "signature_verification_skipped"
                );
                return allowed;
            }
        };

        let token = match SignatureToken::parse(header) {
            Some(token) => token,
            None => {
                warn!("signature_header_malformed");
                return false;
            }
        };

        let tolerance_ms = i64::try_from(self.tolerance.as_millis()).unwrap_or(i64::MAX);
        let oldest_allowed_ms = now_ms.saturating_sub(tolerance_ms);
        let signed_at_ms = token.timestamp.saturating_mul(1000);

        if signed_at_ms <= oldest_allowed_ms {
            warn!(
                signature_timestamp = token.timestamp,
                now_ms = now_ms,
                tolerance_secs = self.tolerance.as_secs(),
                "signature_stale"
            );
            return false;
        }

        let body = match std::str::from_utf8(raw_body) {
            Ok(body) => body,
            Err(_) => {
                warn!(body_length = raw_body.len(), "signature_body_not_utf8");
                return false;
            }
        };

        let expected = match compute_digest(secret, token.timestamp, body) {
            Some(expected) => expected,
            None => {
                warn!("signature_invalid_key");
                return false;
            }
        };

        let valid = constant_time_compare(&expected, &token.digest);

        if !valid {
            warn!(
                expected_length = expected.len(),
                actual_length = token.digest.len(),
                "signature_mismatch"
            );
        }

        valid
    }
}

/// Verify with the default fail-open policy and tolerance.
///
/// A missing or blank secret, or a missing header, passes.
pub fn verify_signature(raw_body: &[u8], signature_header: Option<&str>, secret: Option<&str>) -> bool {
    SignatureVerifier::new(secret.map(str::to_string), MissingConfigPolicy::FailOpen)
        .verify(raw_body, signature_header)
}

/// Build a header value the platform would send for `body` at `timestamp`.
pub fn build_signature(body: &str, secret: &str, timestamp: i64) -> String {
    // HMAC accepts keys of any length, so this cannot fail in practice.
    let digest = compute_digest(secret, timestamp, body).unwrap_or_default();
    format!("t={},{}", timestamp, digest)
}

/// `v0=` + hex(HMAC-SHA256(secret, "<timestamp>.<body>"))
fn compute_digest(secret: &str, timestamp: i64, body: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(format!("{}.{}", timestamp, body).as_bytes());
    Some(format!(
        "{}{}",
        DIGEST_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn now_millis() -> i64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    i64::try_from(millis).unwrap_or(i64::MAX)
}
