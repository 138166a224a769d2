//! JSON payload codec.
//!
//! Application payloads travel as UTF-8 JSON text with the `String` format
//! tag. Decoding is all-or-nothing: a body that is not valid UTF-8, or not
//! valid JSON for the target type, fails with [`DecodeError`].

use crate::error::{DecodeError, ExchangeError};
use crate::message::{Message, MessageFormat};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;

/// Encodes and decodes message bodies as UTF-8 JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Serialize a value to UTF-8 JSON bytes
    pub fn encode<T>(value: &T) -> Result<Bytes, ExchangeError>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(ExchangeError::Encode)
    }

    /// Serialize a value into a `String`-format message
    pub fn encode_message<T>(value: &T) -> Result<Message, ExchangeError>
    where
        T: Serialize + ?Sized,
    {
        Ok(Message::new(Self::encode(value)?).with_format(MessageFormat::String))
    }

    /// Parse UTF-8 JSON bytes into a value
    pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, DecodeError> {
        let text = std::str::from_utf8(body).map_err(|e| DecodeError::InvalidUtf8 {
            valid_up_to: e.valid_up_to(),
        })?;
        Ok(serde_json::from_str(text)?)
    }

    /// Check that a body decodes as JSON without keeping the value
    pub fn validate(body: &[u8]) -> Result<(), DecodeError> {
        Self::decode::<serde::de::IgnoredAny>(body).map(|_| ())
    }
}
