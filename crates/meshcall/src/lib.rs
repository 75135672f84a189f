//! # meshcall
//!
//! Location-transparent remote invocation for device meshes where not
//! every device can reach every other one.
//!
//! A [`Node`] turns an [`Invocation`](meshcall_protocol::Invocation) into
//! bytes on a connector, finds a path to the target system (directly,
//! through a chain of forwarding hops, or relayed by a
//! [`GatewayServer`](meshcall_route::GatewayServer)) and delivers the
//! result back, resuming delivery if the connector dies halfway.
//!
//! ## Layers
//!
//! ```text
//! meshcall            Node, MeshConfig, WebSocketPlugins, gateway binary
//! meshcall-invoke     InvocationSemantic, StreamSemantic
//! meshcall-route      Router, Mux, GatewayServer
//! meshcall-session    SessionOpener, Registry, PluginManager, RouteTable
//! meshcall-fragment   Fragmenter for small-packet transports
//! meshcall-protocol   wire types and codecs
//! meshcall-transport  Connector, PacketChannel, WebSocket binding
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshcall::prelude::*;
//!
//! // Implement Registry for your objects, then:
//! // let config = MeshConfig::from_file("meshcall.toml")?;
//! // let plugins = WebSocketPlugins::new(config.system_id(), vec![]);
//! // let node = Node::new(plugins, StaticRoutes::new(), my_registry, JsonCodec, &config);
//! // node.start();
//! // let outcome = node.invoke(Invocation::new(me, them, "ping")).await;
//! ```

mod config;
mod error;
mod net;
mod node;
pub mod telemetry;

pub use config::{FragmentSection, InvokeSection, MeshConfig, RouterSection};
pub use error::MeshError;
pub use net::{dial_websocket, WebSocketPlugins, WEBSOCKET_KIND};
pub use node::Node;

pub use meshcall_fragment as fragment;
pub use meshcall_invoke as invoke;
pub use meshcall_protocol as protocol;
pub use meshcall_route as route;
pub use meshcall_session as session;
pub use meshcall_transport as transport;

/// Convenient re-exports for the common case.
pub mod prelude {
    pub use crate::{MeshConfig, MeshError, Node, WebSocketPlugins};

    pub use meshcall_fragment::{FragmentConfig, Fragmenter};
    pub use meshcall_invoke::{InvocationSemantic, InvokeConfig, StreamSemantic};
    pub use meshcall_protocol::{
        Codec, Invocation, InvocationFault, InvocationId, JsonCodec, NfCollection, ObjectId,
        ReferenceId, Route, SemanticKind, SystemId, TransportDescription,
    };
    pub use meshcall_route::{GatewayServer, Router, RouterConfig};
    pub use meshcall_session::{PluginManager, Registry, RouteTable, SessionOpener, StaticRoutes};
    pub use meshcall_transport::{Connector, MemoryPacketChannel, PacketChannel, PacketEvent};
}
