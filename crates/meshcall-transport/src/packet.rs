//! Bounded, unreliable packet channels.
//!
//! A [`PacketChannel`] carries packets no larger than
//! [`max_payload`](PacketChannel::max_payload) bytes with no delivery or
//! ordering guarantee. Instead of per-event listener registries, each
//! channel publishes a tagged [`PacketEvent`] on a broadcast channel;
//! every [`subscribe`](PacketChannel::subscribe)r sees every event from the
//! moment it subscribed.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::TransportError;

/// Events buffered per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 1024;

/// Something that happened on a packet channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketEvent {
    /// A packet arrived from the peer.
    Received(Vec<u8>),
    /// The channel closed. No further events follow.
    Closed,
}

/// A channel of small, fixed-maximum-size packets.
pub trait PacketChannel: Send + Sync + 'static {
    /// The error type for send failures.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Largest payload, in bytes, a single [`send`](Self::send) accepts.
    fn max_payload(&self) -> usize;

    /// Transmits one packet. Delivery is not guaranteed.
    ///
    /// Implementations reject packets larger than
    /// [`max_payload`](Self::max_payload).
    fn send(
        &self,
        packet: Vec<u8>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Registers a new listener for reception and closure events.
    fn subscribe(&self) -> broadcast::Receiver<PacketEvent>;
}

/// Decides whether an outgoing packet is lost. Returns `true` to drop.
type LossFilter = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// One end of an in-memory packet link.
///
/// Links are created in pairs with [`MemoryPacketChannel::pair`]. A loss
/// filter can be installed to simulate an unreliable radio.
pub struct MemoryPacketChannel {
    max_payload: usize,
    local: broadcast::Sender<PacketEvent>,
    peer: broadcast::Sender<PacketEvent>,
    closed: Arc<AtomicBool>,
    loss: Option<LossFilter>,
}

impl MemoryPacketChannel {
    /// Creates a connected pair of channels sharing `max_payload`.
    pub fn pair(max_payload: usize) -> (Self, Self) {
        let (a_events, _) = broadcast::channel(EVENT_CAPACITY);
        let (b_events, _) = broadcast::channel(EVENT_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        let a = Self {
            max_payload,
            local: a_events.clone(),
            peer: b_events.clone(),
            closed: Arc::clone(&closed),
            loss: None,
        };
        let b = Self {
            max_payload,
            local: b_events,
            peer: a_events,
            closed,
            loss: None,
        };
        (a, b)
    }

    /// Installs a filter that silently drops outgoing packets for which
    /// it returns `true`.
    pub fn with_loss(
        mut self,
        filter: impl Fn(&[u8]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.loss = Some(Arc::new(filter));
        self
    }

    /// Closes the link. Both ends publish [`PacketEvent::Closed`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.local.send(PacketEvent::Closed);
            let _ = self.peer.send(PacketEvent::Closed);
            tracing::debug!("memory packet link closed");
        }
    }
}

impl PacketChannel for MemoryPacketChannel {
    type Error = TransportError;

    fn max_payload(&self) -> usize {
        self.max_payload
    }

    async fn send(&self, packet: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed(
                "memory packet link".into(),
            ));
        }
        if packet.len() > self.max_payload {
            return Err(TransportError::PacketTooLarge {
                len: packet.len(),
                max: self.max_payload,
            });
        }
        if self.loss.as_ref().is_some_and(|lost| lost(&packet)) {
            tracing::trace!(len = packet.len(), "packet lost");
            return Ok(());
        }
        // Nobody listening is the same as the radio dropping the packet.
        let _ = self.peer.send(PacketEvent::Received(packet));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PacketEvent> {
        self.local.subscribe()
    }
}
