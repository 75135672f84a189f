//! Error types for the fragmentation layer.

/// Errors raised while splitting, sending or parsing fragments.
#[derive(Debug, thiserror::Error)]
pub enum FragmentError {
    /// The logical packet needs more fragments than the 15-bit index can
    /// address. Raised synchronously to the sender and never retried.
    #[error("packet needs {needed} fragments, at most {max} are addressable")]
    TooManyFragments { needed: usize, max: usize },

    /// The underlying channel cannot carry the fragment header plus at
    /// least one payload byte.
    #[error("channel payload of {max_payload} bytes cannot fit a {header}-byte fragment header")]
    ChannelTooSmall { max_payload: usize, header: usize },

    /// A received packet is not a valid fragment.
    #[error("malformed fragment: {0}")]
    Malformed(String),

    /// The underlying packet channel failed.
    #[error("underlying channel failed: {0}")]
    Channel(#[source] Box<dyn std::error::Error + Send + Sync>),
}
