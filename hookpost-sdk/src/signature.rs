//! Signature algorithm and verification for hookpost webhook deliveries.
//!
//! Every delivery carries an HMAC-SHA256 tag over the timestamp-prefixed
//! raw JSON body:
//!
//! ```text
//! X-Webhook-Timestamp: {unix_timestamp}
//! X-Webhook-Signature: sha256={hex(HMAC-SHA256(secret, "{unix_timestamp}.{raw_json_body}"))}
//! ```
//!
//! The sending side uses [`Signer`], which owns the system-wide default
//! secret and prefers a subscription-specific one when present. Receivers
//! reproduce the tag with [`verify_signature`] (see also
//! [`crate::receiver::verify_webhook`]).

/// Header name for the HMAC signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Header name carrying the unix timestamp that was signed.
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";

/// Header name carrying the delivery's event id.
pub const EVENT_ID_HEADER: &str = "X-Webhook-Event-ID";

/// Header name carrying the delivery's event type.
pub const EVENT_TYPE_HEADER: &str = "X-Webhook-Event-Type";

/// Scheme prefix of the signature header value.
pub const SIGNATURE_SCHEME: &str = "sha256=";

/// Errors produced by signature operations.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid header format")]
    InvalidFormat,
    #[error("invalid hex encoding")]
    InvalidHex,
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid signature")]
    SignatureMismatch,
    #[error("signature timestamp outside of the accepted window")]
    Expired,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// The exact bytes covered by the signature: `"{timestamp}.{payload}"`.
fn signed_message(timestamp: i64, payload: &[u8]) -> Vec<u8> {
    let prefix = format!("{timestamp}.");
    let mut message = Vec::with_capacity(prefix.len() + payload.len());
    message.extend_from_slice(prefix.as_bytes());
    message.extend_from_slice(payload);
    message
}

/// Compute `hex(HMAC-SHA256(secret, "{timestamp}.{payload}"))`.
///
/// Pure and deterministic; a receiver holding the same secret, timestamp
/// and body bytes gets the same string.
pub fn sign_payload(timestamp: i64, payload: &[u8], secret: &[u8]) -> String {
    let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, secret);
    let tag = ring::hmac::sign(&key, &signed_message(timestamp, payload));
    hex::encode(tag.as_ref())
}

/// Signs outbound payloads, falling back to a default secret.
///
/// The default secret is injected at construction so that nothing in the
/// delivery path depends on process-global state.
#[derive(Clone)]
pub struct Signer {
    default_secret: Box<[u8]>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("default_secret", &"<redacted>")
            .finish()
    }
}

impl Signer {
    /// Create a signer with the system-wide default secret.
    pub fn new(default_secret: impl Into<Box<[u8]>>) -> Self {
        Self {
            default_secret: default_secret.into(),
        }
    }

    /// Pick the secret to sign with: `specific` when present and non-empty,
    /// otherwise the default.
    pub fn resolve<'a>(&'a self, specific: Option<&'a str>) -> &'a [u8] {
        match specific {
            Some(secret) if !secret.is_empty() => secret.as_bytes(),
            _ => &self.default_secret,
        }
    }

    /// Sign `payload` with the resolved secret and return the hex tag.
    pub fn sign(&self, timestamp: i64, payload: &[u8], specific: Option<&str>) -> String {
        sign_payload(timestamp, payload, self.resolve(specific))
    }
}

// ---------------------------------------------------------------------------
// Header parsing / formatting
// ---------------------------------------------------------------------------

/// Format the `X-Webhook-Signature` header value (`sha256={hex}`).
pub fn format_signature_header(hex_signature: &str) -> String {
    format!("{SIGNATURE_SCHEME}{hex_signature}")
}

/// Parse an `X-Webhook-Signature` header value into the raw tag bytes.
pub fn parse_signature_header(value: &str) -> Result<Vec<u8>, SignatureError> {
    let hex_signature = value
        .trim()
        .strip_prefix(SIGNATURE_SCHEME)
        .ok_or(SignatureError::InvalidFormat)?;
    hex::decode(hex_signature).map_err(|_| SignatureError::InvalidHex)
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Verify an `X-Webhook-Signature` header against the timestamp and raw body.
///
/// The comparison is constant-time. No freshness check is applied here;
/// receivers that want a replay window call [`check_timestamp`] with a
/// tolerance of their choosing.
pub fn verify_signature(
    header_value: &str,
    timestamp: i64,
    body: &[u8],
    secret: &[u8],
) -> Result<(), SignatureError> {
    let tag = parse_signature_header(header_value)?;
    ring::hmac::verify(
        &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, secret),
        &signed_message(timestamp, body),
        &tag,
    )?;
    Ok(())
}

/// Reject timestamps further than `tolerance` from `now`, in either direction.
pub fn check_timestamp(
    timestamp: i64,
    now: time::OffsetDateTime,
    tolerance: time::Duration,
) -> Result<(), SignatureError> {
    // Untrusted input; an out-of-range value is expired, never an overflow.
    match now.unix_timestamp().checked_sub(timestamp) {
        Some(skew) if skew.unsigned_abs() <= tolerance.whole_seconds().unsigned_abs() => Ok(()),
        _ => Err(SignatureError::Expired),
    }
}

// ---------------------------------------------------------------------------
// Payload digest
// ---------------------------------------------------------------------------

/// Hex SHA-256 of a serialized payload.
///
/// Stored as `payload_hash` on every delivery row and recomputable by
/// receivers from the envelope's raw `payload`, which makes it usable as an
/// idempotency key.
pub fn payload_digest(payload: &[u8]) -> String {
    hex::encode(ring::digest::digest(&ring::digest::SHA256, payload).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMESTAMP: i64 = 1_706_400_000;
    const BODY: &[u8] = br#"{"event_id":"abc","payload":{"name":"Ada"}}"#;

    #[test]
    fn test_signature_matches_independent_hmac() {
        let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, b"secret");
        let message = format!("{}.{}", TIMESTAMP, std::str::from_utf8(BODY).unwrap());
        let expected = hex::encode(ring::hmac::sign(&key, message.as_bytes()).as_ref());

        assert_eq!(sign_payload(TIMESTAMP, BODY, b"secret"), expected);
    }

    #[test]
    fn test_signature_is_hex_sha256() {
        let sig = sign_payload(TIMESTAMP, BODY, b"secret");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_depends_on_every_input() {
        let base = sign_payload(TIMESTAMP, BODY, b"secret");
        assert_ne!(base, sign_payload(TIMESTAMP + 1, BODY, b"secret"));
        assert_ne!(base, sign_payload(TIMESTAMP, b"{}", b"secret"));
        assert_ne!(base, sign_payload(TIMESTAMP, BODY, b"other"));
    }

    #[test]
    fn test_signer_prefers_specific_secret() {
        let signer = Signer::new(b"default".to_vec());
        assert_eq!(signer.resolve(Some("sub-secret")), b"sub-secret");
        assert_eq!(signer.resolve(Some("")), b"default");
        assert_eq!(signer.resolve(None), b"default");
        assert_eq!(
            signer.sign(TIMESTAMP, BODY, None),
            sign_payload(TIMESTAMP, BODY, b"default")
        );
    }

    #[test]
    fn test_signer_debug_hides_secret() {
        let signer = Signer::new(b"hunter2".to_vec());
        assert!(!format!("{signer:?}").contains("hunter2"));
    }

    #[test]
    fn test_verify_roundtrip_and_tamper() {
        let header = format_signature_header(&sign_payload(TIMESTAMP, BODY, b"secret"));
        assert!(header.starts_with("sha256="));
        assert!(verify_signature(&header, TIMESTAMP, BODY, b"secret").is_ok());

        assert!(matches!(
            verify_signature(&header, TIMESTAMP, b"{\"tampered\":true}", b"secret"),
            Err(SignatureError::SignatureMismatch)
        ));
        assert!(matches!(
            verify_signature(&header, TIMESTAMP + 1, BODY, b"secret"),
            Err(SignatureError::SignatureMismatch)
        ));
        assert!(matches!(
            verify_signature(&header, TIMESTAMP, BODY, b"wrong"),
            Err(SignatureError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_parse_signature_header_rejects_garbage() {
        assert!(matches!(
            parse_signature_header("md5=abcd"),
            Err(SignatureError::InvalidFormat)
        ));
        assert!(matches!(
            parse_signature_header("sha256=not-hex"),
            Err(SignatureError::InvalidHex)
        ));
    }

    #[test]
    fn test_check_timestamp_window() {
        let now = time::OffsetDateTime::from_unix_timestamp(TIMESTAMP).unwrap();
        let window = time::Duration::minutes(5);
        assert!(check_timestamp(TIMESTAMP - 299, now, window).is_ok());
        assert!(check_timestamp(TIMESTAMP + 10, now, window).is_ok());
        assert!(matches!(
            check_timestamp(TIMESTAMP - 301, now, window),
            Err(SignatureError::Expired)
        ));
        assert!(matches!(
            check_timestamp(TIMESTAMP + 301, now, window),
            Err(SignatureError::Expired)
        ));
    }

    #[test]
    fn test_check_timestamp_rejects_extreme_values() {
        let now = time::OffsetDateTime::from_unix_timestamp(TIMESTAMP).unwrap();
        let window = time::Duration::minutes(5);
        for timestamp in [i64::MIN, i64::MIN + 1, i64::MAX, 0] {
            assert!(matches!(
                check_timestamp(timestamp, now, window),
                Err(SignatureError::Expired)
            ));
        }
    }

    #[test]
    fn test_payload_digest_known_vectors() {
        assert_eq!(
            payload_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            payload_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_payload_digest_sensitive_to_single_byte() {
        assert_ne!(payload_digest(br#"{"a":1}"#), payload_digest(br#"{"a":2}"#));
        assert_eq!(payload_digest(br#"{"a":1}"#), payload_digest(br#"{"a":1}"#));
    }
}
