//! Versioned payload envelope for cached values.
//!
//! Values are stored as MessagePack maps (`rmp_serde::to_vec_named`), so adding
//! optional fields to a cached type does not break readers of older payloads. The
//! envelope header is decoded first and checked for its schema version and expiry
//! before the body is touched.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::CacheError;

/// Current envelope schema version.
pub const SCHEMA_VERSION: u16 = 1;

#[derive(Serialize)]
struct EnvelopeOut<'a, T> {
    schema: u16,
    namespace: &'a str,
    stored_at_ms: i64,
    expires_at_ms: i64,
    body: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    schema: u16,
    expires_at_ms: i64,
}

#[derive(Deserialize)]
struct EnvelopeIn<T> {
    body: T,
}

/// Result of decoding a stored payload.
#[derive(Debug, PartialEq)]
pub enum Decoded<T> {
    /// The payload is current and within its TTL.
    Fresh(T),
    /// The payload outlived its expiry.
    Expired,
    /// The payload was written with another schema version.
    StaleSchema(u16),
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Encodes a value with its namespace and expiry.
///
/// # Errors
///
/// Returns [`CacheError::Payload`] if the value cannot be serialized.
pub fn encode<T: Serialize>(
    namespace: &str,
    value: &T,
    now_ms: i64,
    ttl_ms: i64,
) -> Result<Vec<u8>, CacheError> {
    let envelope = EnvelopeOut {
        schema: SCHEMA_VERSION,
        namespace,
        stored_at_ms: now_ms,
        expires_at_ms: now_ms.saturating_add(ttl_ms),
        body: value,
    };
    rmp_serde::to_vec_named(&envelope).map_err(|e| CacheError::Payload(e.to_string()))
}

/// Decodes a stored payload, checking schema and expiry before the body.
///
/// # Errors
///
/// Returns [`CacheError::Payload`] if the bytes are not a valid envelope or the body
/// does not match `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8], now_ms: i64) -> Result<Decoded<T>, CacheError> {
    let header: EnvelopeHeader =
        rmp_serde::from_slice(bytes).map_err(|e| CacheError::Payload(e.to_string()))?;

    if header.schema != SCHEMA_VERSION {
        return Ok(Decoded::StaleSchema(header.schema));
    }
    if now_ms >= header.expires_at_ms {
        return Ok(Decoded::Expired);
    }

    let envelope: EnvelopeIn<T> =
        rmp_serde::from_slice(bytes).map_err(|e| CacheError::Payload(e.to_string()))?;
    Ok(Decoded::Fresh(envelope.body))
}
