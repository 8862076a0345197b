//! Webhook verification helper for receivers.
//!
//! # Delivery guarantee
//!
//! hookpost delivers **at least once**. A response lost after the receiver
//! already processed a request (a timeout, a dropped connection) makes the
//! dispatcher retry, and the receiver then sees the same delivery again.
//! Receivers must deduplicate, keyed on [`DeliveryEnvelope::event_id`]
//! and/or [`DeliveryEnvelope::payload_hash`].

use crate::objects::DeliveryEnvelope;
use crate::signature::{SignatureError, verify_signature};

/// Verify and deserialize an incoming hookpost delivery.
///
/// * `signature_header` – value of the `X-Webhook-Signature` request header.
/// * `timestamp_header` – value of the `X-Webhook-Timestamp` request header.
/// * `body` – raw request body bytes, exactly as received.
/// * `secret` – the subscription secret shared with the sender.
///
/// Returns the authenticated envelope. Replay-window enforcement is left to
/// the caller (see [`crate::signature::check_timestamp`]).
///
/// # Example
///
/// ```ignore
/// use hookpost_sdk::receiver::verify_webhook;
///
/// let envelope = verify_webhook(signature, timestamp, &body, secret)?;
/// if seen_before(envelope.event_id) {
///     return Ok(());
/// }
/// ```
pub fn verify_webhook(
    signature_header: &str,
    timestamp_header: &str,
    body: &[u8],
    secret: &[u8],
) -> Result<DeliveryEnvelope, SignatureError> {
    let timestamp: i64 = timestamp_header
        .trim()
        .parse()
        .map_err(|_| SignatureError::InvalidTimestamp)?;
    verify_signature(signature_header, timestamp, body, secret)?;
    Ok(serde_json::from_slice(body)?)
}
