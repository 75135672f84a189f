//! Wire protocol for meshcall.
//!
//! This crate defines what travels over connectors:
//!
//! - **Types** ([`SystemId`], [`Invocation`], [`NfCollection`], [`Route`],
//!   ...): the data model every layer shares.
//! - **Wire messages** ([`ForwardHeader`], [`RouteRequest`],
//!   [`RelayHeader`], [`MuxFrame`], ...) and the typed value helpers
//!   [`write_value`] / [`read_value`].
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how values become bytes.
//!
//! ```text
//! Transport (Connector) → Protocol (typed values) → Invocation / Routing
//! ```

mod codec;
mod error;
mod types;
mod wire;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    CallMode, Invocation, InvocationFault, InvocationId, NfCollection, ObjectId,
    ReferenceId, Route, SemanticKind, SystemId, TransportDescription,
};
pub use wire::{
    read_value, write_value, Announcement, ForwardHeader, FrameBody, GatewayHello,
    MuxFrame, RelayHeader, RouteRequest, NEW_CALL_MARKER, RESUME_MARKER,
};
