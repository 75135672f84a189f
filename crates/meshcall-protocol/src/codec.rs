//! Codec trait and implementations for serializing values onto connectors.
//!
//! Everything above the transport layer writes typed values: call markers,
//! invocations, routing headers, gateway messages. The [`Codec`] decides
//! how those values become bytes. Object payloads inside an invocation
//! (arguments, results) are already opaque bytes produced by the
//! application's own serializer; the codec only frames them.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// Codecs are cloned into every task that owns a connector, so they are
/// expected to be cheap to clone (usually zero-sized).
pub trait Codec: Clone + Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Behind the `json` feature flag (enabled by default).
///
/// ## Example
///
/// ```rust
/// use meshcall_protocol::{Codec, JsonCodec, SystemId};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&SystemId(7)).unwrap();
/// let decoded: SystemId = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, SystemId(7));
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;

    #[test]
    fn test_json_codec_decode_garbage_returns_decode_error() {
        let result: Result<u32, _> = JsonCodec.decode(b"not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_json_codec_bool_marker_is_single_token() {
        // Call markers go on the wire as a bare JSON boolean.
        assert_eq!(JsonCodec.encode(&true).unwrap(), b"true");
        assert_eq!(JsonCodec.encode(&false).unwrap(), b"false");
    }
}
