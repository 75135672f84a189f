//! Plug-in manager and route table contracts.
//!
//! The plug-in framework (device discovery, transport plug-ins, session
//! negotiation) is external. The router only needs to know who it is,
//! which systems it can see, how to reach them, and how to dial a
//! transport description.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use meshcall_protocol::{Route, SystemId, TransportDescription};
use meshcall_transport::Connector;

use crate::SessionError;

/// The device registry and transport plug-ins of one node.
pub trait PluginManager: Send + Sync + 'static {
    /// The id of the system this manager runs on.
    fn local_system(&self) -> SystemId;

    /// How peers can reach this system directly.
    fn local_descriptions(&self) -> Vec<TransportDescription>;

    /// Transport descriptions known locally for `system`, e.g. from
    /// discovery. Empty if the system is not directly visible.
    fn descriptions(&self, system: SystemId) -> Vec<TransportDescription>;

    /// Systems currently visible to the device registry.
    fn reachable_systems(&self) -> BTreeSet<SystemId>;

    /// Opens a raw connector over one transport description.
    fn connect(
        &self,
        description: &TransportDescription,
    ) -> impl Future<Output = Result<Connector, SessionError>> + Send;
}

impl<T: PluginManager> PluginManager for Arc<T> {
    fn local_system(&self) -> SystemId {
        (**self).local_system()
    }

    fn local_descriptions(&self) -> Vec<TransportDescription> {
        (**self).local_descriptions()
    }

    fn descriptions(&self, system: SystemId) -> Vec<TransportDescription> {
        (**self).descriptions(system)
    }

    fn reachable_systems(&self) -> BTreeSet<SystemId> {
        (**self).reachable_systems()
    }

    fn connect(
        &self,
        description: &TransportDescription,
    ) -> impl Future<Output = Result<Connector, SessionError>> + Send {
        (**self).connect(description)
    }
}

/// Supplies routes discovered by some external mechanism.
pub trait RouteTable: Send + Sync + 'static {
    /// The current route to `target`, if one is known.
    fn route(&self, target: SystemId) -> Option<Route>;
}

impl<T: RouteTable> RouteTable for Arc<T> {
    fn route(&self, target: SystemId) -> Option<Route> {
        (**self).route(target)
    }
}

/// A route table filled in by hand.
#[derive(Debug, Default)]
pub struct StaticRoutes {
    routes: RwLock<HashMap<SystemId, Route>>,
}

impl StaticRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `route`, keyed by its final target. Replaces any previous
    /// route to that target.
    pub fn insert(&self, route: Route) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(route.target(), route);
    }

    pub fn remove(&self, target: SystemId) -> Option<Route> {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&target)
    }
}

impl RouteTable for StaticRoutes {
    fn route(&self, target: SystemId) -> Option<Route> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&target)
            .cloned()
    }
}
