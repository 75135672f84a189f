//! WebSocket plug-in: dials `ws` transport descriptions.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use meshcall_protocol::{SystemId, TransportDescription};
use meshcall_session::{PluginManager, SessionError};
use meshcall_transport::{Connector, WebSocketConnection};
use tracing::debug;

/// Transport kind handled by [`WebSocketPlugins`]. The address is a
/// WebSocket URL such as `ws://10.0.0.7:7600`.
pub const WEBSOCKET_KIND: &str = "ws";

/// A [`PluginManager`] backed by a hand-maintained peer directory and
/// WebSocket connections.
///
/// Discovery is outside this crate: whoever learns about a peer calls
/// [`WebSocketPlugins::add_peer`].
#[derive(Debug)]
pub struct WebSocketPlugins {
    system: SystemId,
    advertised: Vec<TransportDescription>,
    peers: RwLock<HashMap<SystemId, Vec<TransportDescription>>>,
}

impl WebSocketPlugins {
    /// `advertised` is how peers reach this system (usually the URL of
    /// the local listener); it may be empty.
    pub fn new(system: SystemId, advertised: Vec<TransportDescription>) -> Self {
        Self {
            system,
            advertised,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Records a way to reach `system`. Repeated descriptions are kept
    /// once.
    pub fn add_peer(&self, system: SystemId, description: TransportDescription) {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        let known = peers.entry(system).or_default();
        if !known.contains(&description) {
            known.push(description);
        }
    }

    pub fn remove_peer(&self, system: SystemId) {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&system);
    }
}

/// Opens a WebSocket connector to `url`.
pub async fn dial_websocket(url: &str) -> Result<Connector, SessionError> {
    let conn = WebSocketConnection::connect(url).await?;
    debug!(%url, "websocket connected");
    Ok(Connector::spawn(conn))
}

impl PluginManager for WebSocketPlugins {
    fn local_system(&self) -> SystemId {
        self.system
    }

    fn local_descriptions(&self) -> Vec<TransportDescription> {
        self.advertised.clone()
    }

    fn descriptions(&self, system: SystemId) -> Vec<TransportDescription> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&system)
            .cloned()
            .unwrap_or_default()
    }

    fn reachable_systems(&self) -> BTreeSet<SystemId> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    async fn connect(&self, description: &TransportDescription) -> Result<Connector, SessionError> {
        if description.kind != WEBSOCKET_KIND {
            return Err(SessionError::Refused(format!(
                "no plug-in for transport kind {:?}",
                description.kind
            )));
        }
        dial_websocket(&description.address).await
    }
}
