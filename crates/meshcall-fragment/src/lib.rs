//! Fragmentation layer for meshcall.
//!
//! Turns a bounded, unreliable [`PacketChannel`](meshcall_transport::PacketChannel)
//! into one that carries logical packets up to
//! `min(underlying, 2^15) * (underlying - 12)` bytes.
//!
//! - [`Fragmenter`]: the wrapping channel (send splits, a pump task
//!   reassembles).
//! - [`Reassembler`]: per-packet buffers with idle-timeout collection.
//! - [`Fragment`] / [`PacketId`]: the 12-byte header format.

mod error;
mod fragmenter;
mod header;
mod reassembly;

pub use error::FragmentError;
pub use fragmenter::{FragmentConfig, Fragmenter};
pub use header::{Fragment, PacketId, HEADER_LEN, MAX_FRAGMENTS};
pub use reassembly::Reassembler;
