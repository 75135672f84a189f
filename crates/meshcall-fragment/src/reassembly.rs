//! Reassembly buffers for incoming fragments.
//!
//! The [`Reassembler`] is pure bookkeeping: it owns no channel and no
//! clock. The caller passes the current instant with every fragment, which
//! keeps garbage collection deterministic under test.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::header::{Fragment, PacketId};

/// Fragments received so far for one logical packet.
#[derive(Debug)]
struct Buffer {
    /// Kept sorted by index. Duplicates are stored side by side.
    fragments: Vec<Fragment>,
    /// Index of the fragment carrying the last flag, once seen.
    last: Option<u16>,
    touched: Instant,
}

impl Buffer {
    fn new(now: Instant) -> Self {
        Self {
            fragments: Vec::new(),
            last: None,
            touched: now,
        }
    }

    fn insert(&mut self, fragment: Fragment, now: Instant) {
        if fragment.last {
            self.last = Some(fragment.index);
        }
        let at = self
            .fragments
            .partition_point(|f| f.index <= fragment.index);
        self.fragments.insert(at, fragment);
        self.touched = now;
    }

    fn is_complete(&self) -> bool {
        self.last
            .is_some_and(|last| self.fragments.len() == usize::from(last) + 1)
    }

    fn assemble(self) -> Vec<u8> {
        let len = self.fragments.iter().map(|f| f.payload.len()).sum();
        let mut out = Vec::with_capacity(len);
        for fragment in self.fragments {
            out.extend_from_slice(&fragment.payload);
        }
        out
    }
}

/// Collects fragments per [`PacketId`] until a logical packet is complete.
#[derive(Debug)]
pub struct Reassembler {
    timeout: Duration,
    buffers: HashMap<PacketId, Buffer>,
}

impl Reassembler {
    /// Creates a reassembler that discards buffers idle for longer than
    /// `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            buffers: HashMap::new(),
        }
    }

    /// Stores `fragment` and returns the logical packet if it is now
    /// complete.
    ///
    /// Stale buffers are swept before the fragment is inserted, so a
    /// fragment arriving after its buffer timed out starts a fresh buffer
    /// that can never complete on its own.
    pub fn accept(&mut self, fragment: Fragment, now: Instant) -> Option<Vec<u8>> {
        self.sweep(now);

        let id = fragment.packet;
        let buffer = self.buffers.entry(id).or_insert_with(|| Buffer::new(now));
        trace!(packet = %id, index = fragment.index, last = fragment.last, "fragment received");
        buffer.insert(fragment, now);

        if !buffer.is_complete() {
            return None;
        }
        let buffer = self.buffers.remove(&id)?;
        let count = buffer.fragments.len();
        let packet = buffer.assemble();
        debug!(packet = %id, fragments = count, bytes = packet.len(), "packet reassembled");
        Some(packet)
    }

    /// Discards every buffer untouched for longer than the timeout.
    /// Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let before = self.buffers.len();
        self.buffers.retain(|id, buffer| {
            let keep = now.saturating_duration_since(buffer.touched) <= timeout;
            if !keep {
                debug!(packet = %id, received = buffer.fragments.len(), "reassembly buffer expired");
            }
            keep
        });
        before - self.buffers.len()
    }

    /// Drops all partial packets.
    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    /// Number of logical packets still incomplete.
    pub fn pending(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use meshcall_protocol::SystemId;

    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(3000);

    fn fragment(seq: u16, index: u16, last: bool, payload: &[u8]) -> Fragment {
        Fragment {
            packet: PacketId {
                origin: SystemId(7),
                seq,
            },
            index,
            last,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_accept_single_last_fragment_completes_immediately() {
        let mut r = Reassembler::new(TIMEOUT);
        let now = Instant::now();

        let packet = r.accept(fragment(0, 0, true, b"hi"), now);

        assert_eq!(packet, Some(b"hi".to_vec()));
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn test_accept_out_of_order_reassembles_in_index_order() {
        let mut r = Reassembler::new(TIMEOUT);
        let now = Instant::now();

        assert!(r.accept(fragment(1, 2, true, b"c"), now).is_none());
        assert!(r.accept(fragment(1, 0, false, b"a"), now).is_none());
        let packet = r.accept(fragment(1, 1, false, b"b"), now);

        assert_eq!(packet, Some(b"abc".to_vec()));
    }

    #[test]
    fn test_accept_keeps_packets_from_different_sequences_apart() {
        let mut r = Reassembler::new(TIMEOUT);
        let now = Instant::now();

        assert!(r.accept(fragment(1, 0, false, b"x"), now).is_none());
        assert_eq!(r.accept(fragment(2, 0, true, b"y"), now), Some(b"y".to_vec()));
        assert_eq!(r.pending(), 1);
    }

    #[test]
    fn test_accept_duplicate_index_counts_toward_completion() {
        let mut r = Reassembler::new(TIMEOUT);
        let now = Instant::now();

        assert!(r.accept(fragment(3, 0, false, b"a"), now).is_none());
        // The duplicate fills the slot of the missing index 1.
        let packet = r.accept(fragment(3, 0, false, b"a"), now);
        assert!(packet.is_none());
        let packet = r.accept(fragment(3, 2, true, b"c"), now);

        assert_eq!(packet, Some(b"aac".to_vec()));
    }

    #[test]
    fn test_sweep_removes_idle_buffers_only() {
        let mut r = Reassembler::new(TIMEOUT);
        let start = Instant::now();
        r.accept(fragment(1, 0, false, b"old"), start);
        r.accept(fragment(2, 0, false, b"new"), start + Duration::from_millis(2500));

        let removed = r.sweep(start + Duration::from_millis(3500));

        assert_eq!(removed, 1);
        assert_eq!(r.pending(), 1);
    }

    #[test]
    fn test_late_fragment_after_timeout_never_completes() {
        let mut r = Reassembler::new(TIMEOUT);
        let start = Instant::now();
        r.accept(fragment(5, 0, false, b"a"), start);
        r.accept(fragment(5, 2, true, b"c"), start);

        let late = start + TIMEOUT + Duration::from_millis(1);
        let packet = r.accept(fragment(5, 1, false, b"b"), late);

        assert!(packet.is_none());
        assert_eq!(r.pending(), 1);
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut r = Reassembler::new(TIMEOUT);
        r.accept(fragment(1, 0, false, b"a"), Instant::now());

        r.clear();

        assert_eq!(r.pending(), 0);
    }
}
