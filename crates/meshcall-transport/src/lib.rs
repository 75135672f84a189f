//! Transport abstraction layer for meshcall.
//!
//! Two shapes of channel live here:
//!
//! - [`Connector`]: an owned, message-oriented, reliable channel between
//!   two systems. Invocations, routing headers and gateway traffic all
//!   travel over connectors. Raw transports implement [`Connection`] and
//!   are adapted into a `Connector` with [`Connector::spawn`].
//! - [`PacketChannel`]: an unreliable channel with a small, fixed
//!   maximum payload (sensor radios, IrDA frames, datagrams). Reception
//!   and closure are published as [`PacketEvent`]s.
//!
//! # Feature Flags
//!
//! - `websocket` (default): IP binding via `tokio-tungstenite`

mod connector;
mod error;
mod packet;
#[cfg(feature = "websocket")]
mod websocket;

pub use connector::{
    Connector, ConnectorReader, ConnectorWriter, DEFAULT_PIPE_CAPACITY,
};
pub use error::TransportError;
pub use packet::{MemoryPacketChannel, PacketChannel, PacketEvent};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating process-unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection or connector end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-unique identifier.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

    /// Gracefully shuts down the transport, stopping new connections.
    fn shutdown(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// A raw transport connection that can send and receive messages.
///
/// Futures are required to be `Send` so a connection can be driven from
/// a spawned pump task (see [`Connector::spawn`]).
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends one message to the remote peer.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_next_is_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.into_inner() > a.into_inner());
    }
}
