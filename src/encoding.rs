//! Reversible base64/JSON transform for opaque cookie payloads

use base64::{engine::general_purpose, Engine as _};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Failure to turn a cookie payload back into a value
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON-serialize a value, then base64-encode the JSON text
///
/// # Errors
///
/// Returns an error if the value cannot be represented as JSON
/// (for example a map with non-string keys)
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, DecodeError> {
    let json = serde_json::to_vec(value)?;
    Ok(general_purpose::STANDARD.encode(json))
}

/// Base64-decode a payload, then parse the JSON it contains
///
/// Both the standard and the URL-safe alphabets are accepted.
///
/// # Errors
///
/// Returns a `DecodeError` if the input is not base64 or the decoded
/// bytes are not JSON of the requested shape
pub fn decode<T: DeserializeOwned>(encoded: &str) -> Result<T, DecodeError> {
    let bytes = general_purpose::STANDARD
        .decode(encoded)
        .or_else(|_| general_purpose::URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')))?;
    Ok(serde_json::from_slice(&bytes)?)
}
