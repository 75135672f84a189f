/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed, either by the peer or by releasing
    /// the local end.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Opening an outgoing connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// A packet exceeded the channel's maximum payload.
    #[error("packet of {len} bytes exceeds channel maximum of {max}")]
    PacketTooLarge { len: usize, max: usize },

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Shorthand for a [`TransportError::ConnectionClosed`] naming the
    /// connection that went away.
    pub fn closed(id: impl std::fmt::Display) -> Self {
        Self::ConnectionClosed(id.to_string())
    }
}
