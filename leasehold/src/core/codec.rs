//! Payload codecs.
//!
//! The store never looks inside a job payload. A codec turns the caller's value into the text
//! stored in the `data` column and back.

use thiserror::Error;

/// Errors produced by a [`PayloadCodec`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CodecError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Custom(String),
}

/// Converts job payloads to and from their stored form.
pub trait PayloadCodec: Send + Sync {
    /// Encode a payload into a storable blob.
    fn pack(&self, value: &serde_json::Value) -> Result<String, CodecError>;

    /// Decode a stored blob back into a payload.
    fn unpack(&self, blob: &str) -> Result<serde_json::Value, CodecError>;
}

/// Stores payloads as compact JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn pack(&self, value: &serde_json::Value) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }

    fn unpack(&self, blob: &str) -> Result<serde_json::Value, CodecError> {
        Ok(serde_json::from_str(blob)?)
    }
}
