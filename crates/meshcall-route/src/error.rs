//! Error types for the routing layer.

use meshcall_protocol::{ProtocolError, SystemId};
use meshcall_session::SessionError;
use meshcall_transport::TransportError;

/// Errors raised while opening, forwarding or relaying sessions.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// A plug-in or collaborator refused.
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request travelled too far.
    #[error("hop limit exceeded: {hops} hops, limit {limit}")]
    HopLimit { hops: u32, limit: u32 },

    /// No transport description for the system worked.
    #[error("cannot reach {system}: {reason}")]
    Unreachable { system: SystemId, reason: String },

    /// No gateway connection is up.
    #[error("gateway unavailable")]
    GatewayUnavailable,

    /// The multiplexed channel closed underneath a stream.
    #[error("multiplexed channel closed")]
    MuxClosed,

    /// The router was stopped.
    #[error("router stopped")]
    Stopped,
}

impl From<RouteError> for SessionError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::Session(e) => e,
            RouteError::Protocol(e) => SessionError::Protocol(e),
            RouteError::Transport(e) => SessionError::Transport(e),
            RouteError::HopLimit { hops, limit } => SessionError::HopLimit { hops, limit },
            RouteError::Unreachable { system, reason } => {
                SessionError::Unreachable { system, reason }
            }
            RouteError::GatewayUnavailable | RouteError::MuxClosed => {
                SessionError::Refused(err.to_string())
            }
            RouteError::Stopped => SessionError::Shutdown,
        }
    }
}
