//! Error types for the invocation layer.

use meshcall_protocol::{InvocationFault, ProtocolError};
use meshcall_session::SessionError;

/// Errors raised while carrying an invocation across a connector.
///
/// Only the outgoing side ever turns these into something the caller sees,
/// and then only as an [`InvocationFault`] attached to the invocation.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// Opening the session failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Reading or writing a marker or envelope failed. Malformed data and
    /// a lost connection end up here alike.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A stream session began with a resume marker.
    #[error("stream sessions cannot be resumed")]
    UnexpectedResume,

    /// The retry budget ran out.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<InvokeError>,
    },
}

impl InvokeError {
    /// `true` if the root cause is a routing failure.
    pub fn is_routing(&self) -> bool {
        match self {
            Self::Session(e) => e.is_routing(),
            Self::Exhausted { last, .. } => last.is_routing(),
            _ => false,
        }
    }

    /// The fault an invocation carries when this error ends it.
    pub fn to_fault(&self) -> InvocationFault {
        let reason = self.to_string();
        if self.is_routing() {
            InvocationFault::Routing { reason }
        } else {
            InvocationFault::Delivery { reason }
        }
    }
}
