//! The [`Fragmenter`] packet channel.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use meshcall_protocol::SystemId;
use meshcall_transport::{PacketChannel, PacketEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::header::{Fragment, PacketId, HEADER_LEN, MAX_FRAGMENTS};
use crate::reassembly::Reassembler;
use crate::FragmentError;

const EVENT_CAPACITY: usize = 256;

/// Tunables for a [`Fragmenter`].
#[derive(Debug, Clone)]
pub struct FragmentConfig {
    /// Idle time after which a partial packet is discarded.
    pub timeout: Duration,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
        }
    }
}

/// Carries arbitrarily large logical packets over a bounded packet channel.
///
/// Outgoing packets are split into fragments that each fit the underlying
/// channel; incoming fragments are reassembled in index order and published
/// as [`PacketEvent::Received`] once complete. Nothing is acknowledged or
/// retransmitted: losing one fragment loses the whole logical packet.
///
/// Construction spawns a pump task on the current tokio runtime. The task
/// is aborted when the fragmenter is dropped.
pub struct Fragmenter<C: PacketChannel> {
    inner: Arc<C>,
    origin: SystemId,
    next_seq: AtomicU16,
    reassembler: Arc<Mutex<Reassembler>>,
    events: broadcast::Sender<PacketEvent>,
    pump: JoinHandle<()>,
}

impl<C: PacketChannel> Fragmenter<C> {
    /// Wraps `inner`. Outgoing packets are tagged with `origin`.
    pub fn new(inner: C, origin: SystemId, config: FragmentConfig) -> Self {
        let inner = Arc::new(inner);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let reassembler = Arc::new(Mutex::new(Reassembler::new(config.timeout)));

        let pump = tokio::spawn(pump(
            inner.subscribe(),
            Arc::clone(&reassembler),
            events.clone(),
        ));

        Self {
            inner,
            origin,
            next_seq: AtomicU16::new(0),
            reassembler,
            events,
            pump,
        }
    }

    /// The wrapped channel.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn origin(&self) -> SystemId {
        self.origin
    }

    /// Number of logical packets currently being reassembled.
    pub fn pending(&self) -> usize {
        self.reassembler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending()
    }

    /// Bytes of payload each fragment can carry, or an error if the
    /// underlying channel cannot fit even the header.
    fn chunk_size(&self) -> Result<usize, FragmentError> {
        let max_payload = self.inner.max_payload();
        match max_payload.checked_sub(HEADER_LEN) {
            Some(chunk) if chunk > 0 => Ok(chunk),
            _ => Err(FragmentError::ChannelTooSmall {
                max_payload,
                header: HEADER_LEN,
            }),
        }
    }
}

impl<C: PacketChannel> PacketChannel for Fragmenter<C> {
    type Error = FragmentError;

    /// `min(underlying, 2^15) * (underlying - header)`.
    fn max_payload(&self) -> usize {
        let underlying = self.inner.max_payload();
        underlying
            .min(MAX_FRAGMENTS)
            .saturating_mul(underlying.saturating_sub(HEADER_LEN))
    }

    async fn send(&self, packet: Vec<u8>) -> Result<(), FragmentError> {
        let chunk = self.chunk_size()?;
        let needed = packet.len().div_ceil(chunk).max(1);
        if needed > MAX_FRAGMENTS {
            return Err(FragmentError::TooManyFragments {
                needed,
                max: MAX_FRAGMENTS,
            });
        }

        // Wraps after 65 536 packets; see `PacketId`.
        let id = PacketId {
            origin: self.origin,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        trace!(packet = %id, bytes = packet.len(), fragments = needed, "sending fragmented packet");

        let chunks: Vec<&[u8]> = if packet.is_empty() {
            vec![&packet[..]]
        } else {
            packet.chunks(chunk).collect()
        };
        let last = chunks.len() - 1;
        for (index, payload) in chunks.into_iter().enumerate() {
            let fragment = Fragment {
                packet: id,
                index: index as u16,
                last: index == last,
                payload: payload.to_vec(),
            };
            self.inner
                .send(fragment.encode())
                .await
                .map_err(|e| FragmentError::Channel(Box::new(e)))?;
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PacketEvent> {
        self.events.subscribe()
    }
}

impl<C: PacketChannel> Drop for Fragmenter<C> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Feeds underlying events through the reassembler until the channel
/// closes.
async fn pump(
    mut underlying: broadcast::Receiver<PacketEvent>,
    reassembler: Arc<Mutex<Reassembler>>,
    events: broadcast::Sender<PacketEvent>,
) {
    loop {
        match underlying.recv().await {
            Ok(PacketEvent::Received(bytes)) => {
                let fragment = match Fragment::decode(&bytes) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!(error = %e, "dropping packet");
                        continue;
                    }
                };
                let complete = reassembler
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .accept(fragment, Instant::now());
                if let Some(packet) = complete {
                    let _ = events.send(PacketEvent::Received(packet));
                }
            }
            Ok(PacketEvent::Closed) | Err(broadcast::error::RecvError::Closed) => {
                reassembler
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
                debug!("underlying packet channel closed");
                let _ = events.send(PacketEvent::Closed);
                return;
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "fragment receiver lagged, packets lost");
            }
        }
    }
}
