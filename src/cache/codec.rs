//! Value encoding for cached entries.
//!
//! Opaque values are MessagePack with named fields so any client that speaks
//! MessagePack can read them. Encoding failures are errors. Decoding failures
//! are logged and treated as a miss by the callers.

use crate::error::{DbError, DbResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

pub fn encode<T: Serialize + ?Sized>(value: &T) -> DbResult<Vec<u8>> {
    rmp_serde::to_vec_named(value)
        .map_err(|e| DbError::serialization(format!("Failed to encode cache value: {}", e)))
}

pub fn try_decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    rmp_serde::from_slice(bytes)
        .map_err(|e| DbError::serialization(format!("Failed to decode cache value: {}", e)))
}

/// Decode `bytes`, logging and discarding the error.
pub fn decode_or_warn<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Option<T> {
    match try_decode(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key = %key, error = %e, "Discarding undecodable cache value");
            None
        }
    }
}

/// JSON encoding used by queues.
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> DbResult<String> {
    serde_json::to_string(value)
        .map_err(|e| DbError::serialization(format!("Failed to encode queue item: {}", e)))
}

pub fn decode_json<T: DeserializeOwned>(raw: &str) -> DbResult<T> {
    serde_json::from_str(raw)
        .map_err(|e| DbError::serialization(format!("Failed to decode queue item: {}", e)))
}
