//! Error types for the session layer.

use meshcall_protocol::{ProtocolError, SystemId};
use meshcall_transport::TransportError;

/// Errors that can occur while opening or terminating a session.
///
/// Callers translate these into an
/// [`InvocationFault`](meshcall_protocol::InvocationFault) at the
/// invocation boundary; [`SessionError::is_routing`] decides which kind.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Neither a route nor a gateway leads to the target.
    #[error("no route to {0}")]
    NoRoute(SystemId),

    /// A forwarded request travelled further than allowed.
    #[error("hop limit exceeded: {hops} hops, limit {limit}")]
    HopLimit { hops: u32, limit: u32 },

    /// Every known transport description for the system failed.
    #[error("cannot reach {system}: {reason}")]
    Unreachable { system: SystemId, reason: String },

    /// The peer or an intermediate hop refused the session.
    #[error("session refused: {0}")]
    Refused(String),

    /// The connector failed underneath the session.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A header or envelope could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The component is shutting down.
    #[error("shutting down")]
    Shutdown,
}

impl SessionError {
    /// `true` for failures a caller should see as a routing problem rather
    /// than a delivery problem.
    pub fn is_routing(&self) -> bool {
        matches!(self, Self::NoRoute(_) | Self::HopLimit { .. })
    }
}
