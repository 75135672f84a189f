//! Fragment wire format.
//!
//! Every underlying packet starts with a fixed 12-byte header:
//!
//! ```text
//!  0               8        10                 12
//! ┌───────────────┬────────┬─┬───────────────┬──────────────┐
//! │ origin system │  seq   │L│ index (15 bit)│ chunk bytes… │
//! └───────────────┴────────┴─┴───────────────┴──────────────┘
//!   u64 BE          u16 BE   top bit of the u16 marks the last fragment
//! ```

use std::fmt;

use meshcall_protocol::SystemId;

use crate::FragmentError;

/// Size of the fragment header in bytes.
pub const HEADER_LEN: usize = SystemId::WIRE_LEN + 2 + 2;

/// Most fragments one logical packet may be split into (15-bit index).
pub const MAX_FRAGMENTS: usize = 1 << 15;

const LAST_FLAG: u16 = 0x8000;
const INDEX_MASK: u16 = 0x7FFF;

/// Identifies one logical (oversized) packet.
///
/// `seq` is assigned per origin and wraps at 16 bits, so two packets from
/// the same origin can share an id once 65 536 packets have been sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketId {
    pub origin: SystemId,
    pub seq: u16,
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.origin, self.seq)
    }
}

/// One chunk of a logical packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub packet: PacketId,
    /// Position within the packet, `0..MAX_FRAGMENTS`.
    pub index: u16,
    pub last: bool,
    pub payload: Vec<u8>,
}

impl Fragment {
    /// Serializes header and chunk into one underlying packet.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.index <= INDEX_MASK);
        let mut flags = self.index & INDEX_MASK;
        if self.last {
            flags |= LAST_FLAG;
        }
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.packet.origin.to_be_bytes());
        out.extend_from_slice(&self.packet.seq.to_be_bytes());
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parses an underlying packet.
    ///
    /// # Errors
    /// Returns [`FragmentError::Malformed`] if the packet is shorter than
    /// the header.
    pub fn decode(bytes: &[u8]) -> Result<Self, FragmentError> {
        if bytes.len() < HEADER_LEN {
            return Err(FragmentError::Malformed(format!(
                "{} bytes is shorter than the {HEADER_LEN}-byte header",
                bytes.len()
            )));
        }
        let mut origin = [0u8; SystemId::WIRE_LEN];
        origin.copy_from_slice(&bytes[..SystemId::WIRE_LEN]);
        let origin = SystemId::from_be_bytes(origin);
        let rest = &bytes[SystemId::WIRE_LEN..];
        let seq = u16::from_be_bytes([rest[0], rest[1]]);
        let flags = u16::from_be_bytes([rest[2], rest[3]]);
        Ok(Self {
            packet: PacketId { origin, seq },
            index: flags & INDEX_MASK,
            last: flags & LAST_FLAG != 0,
            payload: rest[4..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_len_is_twelve_bytes() {
        assert_eq!(HEADER_LEN, 12);
    }

    #[test]
    fn test_encode_lays_out_header_fields() {
        let fragment = Fragment {
            packet: PacketId {
                origin: SystemId(0x0102_0304_0506_0708),
                seq: 0x0A0B,
            },
            index: 5,
            last: true,
            payload: vec![0xEE],
        };

        let bytes = fragment.encode();

        assert_eq!(
            bytes,
            vec![1, 2, 3, 4, 5, 6, 7, 8, 0x0A, 0x0B, 0x80, 0x05, 0xEE]
        );
        assert_eq!(Fragment::decode(&bytes).unwrap(), fragment);
    }

    #[test]
    fn test_decode_highest_index_without_last_flag() {
        let fragment = Fragment {
            packet: PacketId {
                origin: SystemId(1),
                seq: 0,
            },
            index: 0x7FFF,
            last: false,
            payload: vec![],
        };

        let decoded = Fragment::decode(&fragment.encode()).unwrap();

        assert_eq!(decoded.index, 0x7FFF);
        assert!(!decoded.last);
    }

    #[test]
    fn test_decode_short_packet_is_malformed() {
        let result = Fragment::decode(&[0; HEADER_LEN - 1]);
        assert!(matches!(result, Err(FragmentError::Malformed(_))));
    }
}
