//! Unified error type for meshcall.

use meshcall_fragment::FragmentError;
use meshcall_invoke::InvokeError;
use meshcall_protocol::ProtocolError;
use meshcall_route::RouteError;
use meshcall_session::SessionError;
use meshcall_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `meshcall` meta-crate, you deal with this single
/// error type instead of importing errors from each sub-crate.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Fragment(#[from] FragmentError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error(transparent)]
    Route(#[from] RouteError),

    /// A configuration file could not be read.
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file is not valid TOML for [`MeshConfig`](crate::MeshConfig).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Logging could not be initialised.
    #[error("cannot initialise tracing: {0}")]
    Telemetry(String),
}
