//! Base64 helpers for transactions and header values.

use std::fmt::{self, Display, Formatter};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Standard-alphabet base64 text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Base64Bytes(String);

impl Base64Bytes {
    /// Encodes raw bytes.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Self {
        Self(b64.encode(input.as_ref()))
    }

    /// Encodes the JSON serialization of `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::encode(serde_json::to_vec(value)?))
    }

    /// Wraps text that is already base64, trimming surrounding whitespace.
    pub fn from_encoded(encoded: impl AsRef<str>) -> Self {
        Self(encoded.as_ref().trim().to_owned())
    }

    /// Decodes to raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid base64.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        b64.decode(&self.0)
    }

    /// Decodes and parses the contained JSON.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeJsonError`] on invalid base64 or JSON.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, DecodeJsonError> {
        let bytes = self.decode()?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Returns the encoded text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the wrapper, returning the encoded text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

/// Failure to decode base64 JSON.
#[derive(Debug, thiserror::Error)]
pub enum DecodeJsonError {
    /// Invalid base64.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    /// Invalid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AsRef<str> for Base64Bytes {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Base64Bytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
