//! The JSON body POSTed to every webhook endpoint.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::signature::payload_digest;

/// Delivery envelope: `{event_id, event_type, event_version, event_source,
/// timestamp, user_id, payload}`.
///
/// `payload` is kept as raw JSON so the bytes on the wire are exactly the
/// bytes that were hashed into `payload_hash` when the event was emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEnvelope {
    pub event_id: Uuid,
    pub event_type: CompactString,
    pub event_version: CompactString,
    pub event_source: CompactString,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub user_id: Uuid,
    pub payload: Box<RawValue>,
}

impl DeliveryEnvelope {
    /// Hex SHA-256 of the raw payload, equal to the sender's `payload_hash`.
    pub fn payload_hash(&self) -> String {
        payload_digest(self.payload.get().as_bytes())
    }

    /// Deserialize the domain payload into a concrete type.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.payload.get())
    }
}
