//! JSON codec for message bodies.

use crate::error::CodecError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A decoded JSON object body.
pub type MapMessage = serde_json::Map<String, serde_json::Value>;

/// Encode a value as a JSON body.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, CodecError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(CodecError::Encode)
}

/// Decode a JSON body into `T`.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(body).map_err(CodecError::Decode)
}

/// Render a body for diagnostics, falling back to lossy UTF-8 for non-JSON.
pub fn pretty_print(body: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => value.to_string(),
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}
