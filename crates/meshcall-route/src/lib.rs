//! Routing layer for meshcall.
//!
//! Gets a connector to a system that may not be directly reachable:
//!
//! - **Direct**: dial one of the target's transport descriptions.
//! - **Forwarded**: write a header chain and let each hop splice the
//!   session onto the next one ([`splice`]).
//! - **Relayed**: ask the [`GatewayServer`] over the multiplexed gateway
//!   link ([`Mux`]). A direct dial races the relay and wins if it
//!   connects within `direct_timeout`; failures are remembered in
//!   [`IndirectMarks`].
//!
//! # Architecture
//!
//! ```text
//! Invocation semantics
//!     ↓ SessionOpener
//! Router ──→ PluginManager::connect (direct)
//!   │ └──→ Mux ⇄ GatewayServer ⇄ Mux ──→ other client (relay)
//!   ↓
//! LocalSession (hop count 0) ──→ Node
//! ```

mod config;
mod error;
mod gateway;
mod marks;
mod mux;
mod router;
mod server;
mod splice;

pub use config::RouterConfig;
pub use error::RouteError;
pub use marks::IndirectMarks;
pub use mux::{Mux, MuxRole};
pub use router::{LocalSession, Router};
pub use server::GatewayServer;
pub use splice::splice;
