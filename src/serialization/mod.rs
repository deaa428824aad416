//! CBOR codec for wire frames.
//!
//! Frames arrive from other participants and are decoded before anything
//! else looks at them, so decoding is bounded: oversized input and trailing
//! bytes after the first item are rejected. Encoding is deterministic, so a
//! retransmitted frame is byte-identical to the original.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Largest frame accepted from a peer (64 MiB).
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("CBOR encoding failed: {0}")]
    Encode(String),

    #[error("CBOR decoding failed: {0}")]
    Decode(String),

    #[error("frame of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
}

pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, SerializationError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| SerializationError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decode exactly one CBOR item spanning all of `bytes`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SerializationError> {
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(SerializationError::TooLarge {
            size: bytes.len(),
            limit: MAX_FRAME_BYTES,
        });
    }

    let mut reader = bytes;
    let value = ciborium::from_reader(&mut reader)
        .map_err(|e| SerializationError::Decode(e.to_string()))?;
    if !reader.is_empty() {
        return Err(SerializationError::TrailingBytes(reader.len()));
    }
    Ok(value)
}
