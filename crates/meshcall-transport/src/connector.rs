//! Owned, message-oriented connectors.
//!
//! A [`Connector`] is exclusively owned by whichever task currently reads
//! from or writes to it. Ownership moves by value; there is no shared
//! handle. Releasing a connector is simply dropping it: the peer's next
//! `recv` reports [`TransportError::ConnectionClosed`] once any messages
//! already in flight have been drained.
//!
//! ```text
//!   Connector A                      Connector B
//! ┌──────────────┐   pipe A → B   ┌──────────────┐
//! │ writer ──────┼───────────────▶│ reader       │
//! │ reader ◀─────┼────────────────┼─────── writer│
//! └──────────────┘   pipe B → A   └──────────────┘
//! ```
//!
//! Forwarding code that needs both directions at once (a splice between
//! two connectors) calls [`Connector::split`] and hands each half to its
//! own task.

use tokio::sync::mpsc;

use crate::{Connection, ConnectionId, TransportError};

/// Number of messages buffered per direction before `send` waits.
pub const DEFAULT_PIPE_CAPACITY: usize = 64;

/// Sending half of a [`Connector`].
///
/// Clones share the pipe; the peer's reads report closure only once every
/// clone is gone.
#[derive(Debug, Clone)]
pub struct ConnectorWriter {
    id: ConnectionId,
    tx: mpsc::Sender<Vec<u8>>,
}

impl ConnectorWriter {
    /// Sends one message to the peer.
    ///
    /// # Errors
    /// Returns [`TransportError::ConnectionClosed`] if the peer has been
    /// released.
    pub async fn send(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.tx
            .send(data)
            .await
            .map_err(|_| TransportError::closed(self.id))
    }

    /// Returns `true` once the receiving side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the receiving side has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Returns the identifier of the connector this half belongs to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Receiving half of a [`Connector`].
#[derive(Debug)]
pub struct ConnectorReader {
    id: ConnectionId,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ConnectorReader {
    /// Receives the next message from the peer.
    ///
    /// # Errors
    /// Returns [`TransportError::ConnectionClosed`] once the peer has been
    /// released and every buffered message has been read.
    pub async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| TransportError::closed(self.id))
    }

    /// Returns the identifier of the connector this half belongs to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

/// An open, exclusively owned channel to a peer.
#[derive(Debug)]
pub struct Connector {
    writer: ConnectorWriter,
    reader: ConnectorReader,
}

impl Connector {
    /// Creates two connectors wired back to back with in-memory pipes.
    ///
    /// Whatever is sent on one end is received on the other.
    pub fn pair() -> (Connector, Connector) {
        Self::pair_with_capacity(DEFAULT_PIPE_CAPACITY)
    }

    /// Like [`Connector::pair`], with an explicit per-direction buffer.
    pub fn pair_with_capacity(capacity: usize) -> (Connector, Connector) {
        let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
        let (b_tx, a_rx) = mpsc::channel(capacity.max(1));
        let a_id = ConnectionId::next();
        let b_id = ConnectionId::next();
        let a = Connector {
            writer: ConnectorWriter { id: a_id, tx: a_tx },
            reader: ConnectorReader { id: a_id, rx: a_rx },
        };
        let b = Connector {
            writer: ConnectorWriter { id: b_id, tx: b_tx },
            reader: ConnectorReader { id: b_id, rx: b_rx },
        };
        (a, b)
    }

    /// Reassembles a connector from two halves.
    pub fn from_halves(writer: ConnectorWriter, reader: ConnectorReader) -> Self {
        Self { writer, reader }
    }

    /// Adapts a raw transport [`Connection`] into a connector.
    ///
    /// A pump task moves messages between the connection and the returned
    /// connector. The pump closes the connection when the connector is
    /// released or the connection fails, whichever happens first.
    pub fn spawn<C: Connection>(conn: C) -> Connector {
        let (app, pump) = Self::pair();
        let (pump_tx, mut pump_rx) = pump.split();
        let id = conn.id();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = pump_rx.recv() => match outgoing {
                        Ok(data) => {
                            if let Err(e) = conn.send(&data).await {
                                tracing::debug!(%id, error = %e, "transport send failed");
                                break;
                            }
                        }
                        // Connector released by its owner.
                        Err(_) => break,
                    },
                    incoming = conn.recv() => match incoming {
                        Ok(Some(data)) => {
                            if pump_tx.send(data).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            tracing::debug!(%id, "transport closed by peer");
                            break;
                        }
                        Err(e) => {
                            tracing::debug!(%id, error = %e, "transport recv failed");
                            break;
                        }
                    },
                }
            }
            if let Err(e) = conn.close().await {
                tracing::trace!(%id, error = %e, "transport close failed");
            }
        });

        app
    }

    /// Sends one message to the peer.
    pub async fn send(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.writer.send(data).await
    }

    /// Receives the next message from the peer.
    pub async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        self.reader.recv().await
    }

    /// Returns `true` once the peer can no longer receive.
    pub fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }

    /// Splits the connector into independently owned halves.
    pub fn split(self) -> (ConnectorWriter, ConnectorReader) {
        (self.writer, self.reader)
    }

    /// Releases the connector. Equivalent to dropping it, with a trace
    /// record of which end went away.
    pub fn release(self) {
        tracing::trace!(id = %self.id(), "connector released");
    }

    /// Returns the identifier of this end.
    pub fn id(&self) -> ConnectionId {
        self.writer.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_send_is_received_by_peer() {
        let (a, mut b) = Connector::pair();

        a.send(b"ping".to_vec()).await.unwrap();

        assert_eq!(b.recv().await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn test_pair_ends_have_distinct_ids() {
        let (a, b) = Connector::pair();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_release_drains_then_reports_closed() {
        // Messages already in flight survive the release of the sender.
        let (a, mut b) = Connector::pair();
        a.send(vec![1]).await.unwrap();
        a.send(vec![2]).await.unwrap();
        a.release();

        assert_eq!(b.recv().await.unwrap(), vec![1]);
        assert_eq!(b.recv().await.unwrap(), vec![2]);
        assert!(matches!(
            b.recv().await,
            Err(TransportError::ConnectionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_send_after_peer_release_fails() {
        let (a, b) = Connector::pair();
        drop(b);

        assert!(a.is_closed());
        assert!(matches!(
            a.send(vec![0]).await,
            Err(TransportError::ConnectionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_split_halves_work_independently() {
        let (a, b) = Connector::pair();
        let (a_tx, mut a_rx) = a.split();
        let (b_tx, mut b_rx) = b.split();

        a_tx.send(b"to b".to_vec()).await.unwrap();
        b_tx.send(b"to a".to_vec()).await.unwrap();

        assert_eq!(b_rx.recv().await.unwrap(), b"to b");
        assert_eq!(a_rx.recv().await.unwrap(), b"to a");
    }

    #[tokio::test]
    async fn test_from_halves_round_trips_split() {
        let (a, mut b) = Connector::pair();
        let id = a.id();
        let (tx, rx) = a.split();
        let a = Connector::from_halves(tx, rx);

        assert_eq!(a.id(), id);
        a.send(vec![9]).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), vec![9]);
    }
}
