//! Collaborator contracts for meshcall.
//!
//! The invocation semantics and the router talk to the rest of the
//! middleware only through the traits in this crate:
//!
//! 1. **Opening sessions**: [`SessionOpener`], implemented by the router.
//! 2. **Local dispatch**: [`Registry`], implemented by the object registry.
//! 3. **Plug-ins and discovery**: [`PluginManager`] and [`RouteTable`].
//!
//! # How it fits in the stack
//!
//! ```text
//! Invocation semantics / Router (above)  ← generic over these traits
//!     ↕
//! Session layer (this crate)  ← contracts + SessionError
//!     ↕
//! Protocol / Transport (below)  ← SystemId, Invocation, Connector
//! ```

mod error;
mod opener;
mod plugin;
mod registry;

pub use error::SessionError;
pub use opener::SessionOpener;
pub use plugin::{PluginManager, RouteTable, StaticRoutes};
pub use registry::Registry;
