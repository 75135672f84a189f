//! Error types for the protocol layer.

use meshcall_transport::TransportError;

/// Errors that can occur while moving typed values over a connector.
///
/// Callers above this layer treat every variant the same way they treat
/// a lost connection: the connector is released and the operation is
/// retried or abandoned.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed, truncated, or the wrong type
    /// for what the protocol expected at this point.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message decoded but violates protocol rules.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The underlying connector failed or closed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
