//! Tracing initialisation.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::MeshError;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "meshcall=info";

/// Installs a compact stdout subscriber filtered by `RUST_LOG`.
///
/// Falls back to `default_filter` (usually [`DEFAULT_FILTER`]) when the
/// variable is unset or invalid. Fails if a global subscriber is
/// already installed.
pub fn init_tracing(default_filter: &str) -> Result<(), MeshError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| MeshError::Telemetry(e.to_string()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).compact())
        .try_init()
        .map_err(|e| MeshError::Telemetry(e.to_string()))
}
