//! Session routing: direct links, forwarded chains and gateway relays.
//!
//! # Outbound
//!
//! [`Router::open`] resolves a route to the target (a one-hop route when
//! the table knows none), obtains a raw connector to the route's first
//! hop and writes one [`ForwardHeader`] per hop onto it:
//!
//! ```text
//! route [A, B, T]   writes  {hops: 2, next: B} {hops: 1, next: T} {hops: 0}
//!                   A consumes the first header, forwards the rest to B, ...
//! ```
//!
//! The raw connector comes from dialing the first hop's transport
//! descriptions. If that fails for a one-hop route and a gateway link is
//! up, the gateway is asked for the target's descriptions; a direct dial
//! races against `direct_timeout` and the relayed stream is used only if
//! it loses.
//!
//! # Inbound
//!
//! [`Router::accept_connector`] reads one forward header. A terminal
//! header hands the connector to the local side (see [`LocalSession`]);
//! otherwise the next hop is dialed and the two connectors are spliced.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use meshcall_protocol::{
    read_value, write_value, Codec, ForwardHeader, NfCollection, Route, SystemId,
    TransportDescription,
};
use meshcall_session::{PluginManager, RouteTable, SessionError, SessionOpener};
use meshcall_transport::Connector;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{splice, IndirectMarks, Mux, RouteError, RouterConfig};

const LOCAL_CAPACITY: usize = 64;

/// A session that terminates on this system.
#[derive(Debug)]
pub struct LocalSession {
    /// Requirements the session was opened with.
    pub requirements: NfCollection,
    pub connector: Connector,
}

pub(crate) struct Shared<M, T, C> {
    pub(crate) manager: M,
    pub(crate) routes: T,
    pub(crate) codec: C,
    pub(crate) config: RouterConfig,
    pub(crate) marks: IndirectMarks,
    gateway: Mutex<Option<Mux>>,
    keep_alive: Mutex<Option<CancellationToken>>,
    local: mpsc::Sender<LocalSession>,
    pub(crate) cancel: CancellationToken,
}

/// Routes sessions to other systems. Cheap to clone.
///
/// The router runs no tasks until [`Router::start`] brings up the gateway
/// keep-alive. Sessions terminating locally (hop count 0, or a target
/// equal to the local system) are delivered on the receiver returned by
/// [`Router::new`].
pub struct Router<M, T, C> {
    shared: Arc<Shared<M, T, C>>,
}

impl<M, T, C> Clone for Router<M, T, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M, T, C> Router<M, T, C>
where
    M: PluginManager,
    T: RouteTable,
    C: Codec,
{
    pub fn new(
        manager: M,
        routes: T,
        codec: C,
        config: RouterConfig,
    ) -> (Self, mpsc::Receiver<LocalSession>) {
        let (local, local_rx) = mpsc::channel(LOCAL_CAPACITY);
        let shared = Arc::new(Shared {
            manager,
            routes,
            codec,
            marks: IndirectMarks::new(config.indirect_suppression),
            config,
            gateway: Mutex::new(None),
            keep_alive: Mutex::new(None),
            local,
            cancel: CancellationToken::new(),
        });
        (Self { shared }, local_rx)
    }

    pub fn local_system(&self) -> SystemId {
        self.shared.manager.local_system()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.shared.config
    }

    pub fn marks(&self) -> &IndirectMarks {
        &self.shared.marks
    }

    /// Opens a session to `target`. The returned connector has the
    /// forward headers already written; the caller's first message is the
    /// first thing the target's semantic reads.
    pub async fn open(
        &self,
        target: SystemId,
        requirements: &NfCollection,
    ) -> Result<Connector, RouteError> {
        self.shared.open(target, requirements).await
    }

    /// Handles a connector accepted from any transport.
    ///
    /// Returns once the connector has been delivered locally or spliced
    /// onto the next hop. On error the connector is released.
    pub async fn accept_connector(&self, conn: Connector) -> Result<(), RouteError> {
        self.shared.accept_connector(conn, 0).await
    }

    /// Starts the gateway keep-alive if a gateway is configured and it is
    /// not already running.
    pub fn start(&self) {
        let Some(gateway) = self.shared.config.gateway.clone() else {
            debug!("no gateway configured");
            return;
        };
        let mut keep_alive = self.shared.keep_alive_slot();
        if keep_alive.is_some() || self.shared.cancel.is_cancelled() {
            return;
        }
        let cancel = self.shared.cancel.child_token();
        *keep_alive = Some(cancel.clone());
        drop(keep_alive);

        tokio::spawn(crate::gateway::keep_alive(
            Arc::clone(&self.shared),
            gateway,
            cancel,
        ));
    }

    /// Stops the gateway keep-alive and drops the gateway link.
    pub fn stop(&self) {
        if let Some(cancel) = self.shared.keep_alive_slot().take() {
            cancel.cancel();
        }
        self.shared.set_gateway(None);
    }

    /// Stops everything: the keep-alive and every splice this router runs.
    pub fn shutdown(&self) {
        self.stop();
        self.shared.cancel.cancel();
        info!(system = %self.local_system(), "router shut down");
    }

    /// `true` while a gateway link is up.
    pub fn has_gateway(&self) -> bool {
        self.shared.gateway().is_some()
    }

    /// The current gateway link, if any.
    pub fn gateway_link(&self) -> Option<Mux> {
        self.shared.gateway()
    }

    /// Attaches an already established gateway link.
    ///
    /// [`Router::start`] does this on its own; this is for callers that
    /// manage the gateway connection themselves.
    pub fn set_gateway(&self, mux: Mux) {
        self.shared.set_gateway(Some(mux));
    }
}

impl<M, T, C> SessionOpener for Router<M, T, C>
where
    M: PluginManager,
    T: RouteTable,
    C: Codec,
{
    async fn open_session(
        &self,
        target: SystemId,
        requirements: &NfCollection,
    ) -> Result<Connector, SessionError> {
        Ok(self.open(target, requirements).await?)
    }
}

impl<M, T, C> Shared<M, T, C>
where
    M: PluginManager,
    T: RouteTable,
    C: Codec,
{
    pub(crate) fn gateway(&self) -> Option<Mux> {
        self.gateway
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_gateway(&self, mux: Option<Mux>) {
        *self.gateway.lock().unwrap_or_else(PoisonError::into_inner) = mux;
    }

    fn keep_alive_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.keep_alive.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn local_system(&self) -> SystemId {
        self.manager.local_system()
    }

    pub(crate) fn hop_limit(&self) -> u32 {
        self.config.hop_limit()
    }

    async fn open(
        self: &Arc<Self>,
        target: SystemId,
        requirements: &NfCollection,
    ) -> Result<Connector, RouteError> {
        if target == self.local_system() {
            let (near, far) = Connector::pair();
            self.deliver_local(requirements.clone(), far).await?;
            return Ok(near);
        }

        let known = self.routes.route(target);
        let route = known.clone().unwrap_or_else(|| Route::direct(target));
        check_depth(route.len() as u32, self.hop_limit())?;

        let raw = match self
            .raw_connect(route.first_hop(), requirements, 0, route.is_direct())
            .await
        {
            Ok(raw) => raw,
            Err(RouteError::Unreachable { .. }) if known.is_none() && self.gateway().is_none() => {
                return Err(SessionError::NoRoute(target).into());
            }
            Err(e) => return Err(e),
        };
        write_chain(&raw, &self.codec, &ForwardHeader::chain(requirements, &route)).await?;
        debug!(%target, hops = route.len(), conn_id = %raw.id(), "session opened");
        Ok(raw)
    }

    /// A connector to `hop` carrying nothing yet.
    ///
    /// Dials the locally known descriptions first. When that fails and
    /// `via_gateway` allows it, falls back to the gateway.
    pub(crate) async fn raw_connect(
        self: &Arc<Self>,
        hop: SystemId,
        requirements: &NfCollection,
        depth: u32,
        via_gateway: bool,
    ) -> Result<Connector, RouteError> {
        let err = match self.dial(hop).await {
            Ok(conn) => return Ok(conn),
            Err(e) => e,
        };
        if !via_gateway || self.gateway().is_none() {
            return Err(err);
        }
        debug!(%hop, error = %err, "normal path failed, asking gateway");
        self.via_gateway(hop, requirements, depth).await
    }

    /// Dials `system` with the descriptions the plug-in manager knows.
    pub(crate) async fn dial(&self, system: SystemId) -> Result<Connector, RouteError> {
        let descriptions = self.manager.descriptions(system);
        self.dial_any(system, &descriptions).await
    }

    /// Tries each description in order and keeps the first that connects.
    pub(crate) async fn dial_any(
        &self,
        system: SystemId,
        descriptions: &[TransportDescription],
    ) -> Result<Connector, RouteError> {
        let mut reason = String::from("no transport descriptions");
        for description in descriptions {
            match self.manager.connect(description).await {
                Ok(conn) => {
                    debug!(%system, %description, conn_id = %conn.id(), "dialed");
                    return Ok(conn);
                }
                Err(e) => {
                    debug!(%system, %description, error = %e, "dial failed");
                    reason = e.to_string();
                }
            }
        }
        Err(RouteError::Unreachable { system, reason })
    }

    pub(crate) async fn accept_connector(
        self: &Arc<Self>,
        mut conn: Connector,
        depth: u32,
    ) -> Result<(), RouteError> {
        let header: ForwardHeader = read_value(&mut conn, &self.codec).await?;
        header.validate()?;
        let limit = self.hop_limit();
        if header.hops > limit {
            warn!(hops = header.hops, limit, conn_id = %conn.id(), "forward refused");
            return Err(RouteError::HopLimit {
                hops: header.hops,
                limit,
            });
        }

        match header.next_hop {
            None => self.deliver_local(header.requirements, conn).await,
            Some(next) => {
                let onward = self
                    .raw_connect(next, &header.requirements, depth, true)
                    .await?;
                debug!(
                    %next,
                    hops = header.hops,
                    from = %conn.id(),
                    to = %onward.id(),
                    "forwarding"
                );
                splice(conn, onward, &self.cancel);
                Ok(())
            }
        }
    }

    pub(crate) async fn deliver_local(
        &self,
        requirements: NfCollection,
        connector: Connector,
    ) -> Result<(), RouteError> {
        self.local
            .send(LocalSession {
                requirements,
                connector,
            })
            .await
            .map_err(|_| RouteError::Stopped)
    }
}

/// Refuses a request that has travelled, or would travel, too far.
pub(crate) fn check_depth(hops: u32, limit: u32) -> Result<(), RouteError> {
    if hops > limit {
        return Err(RouteError::HopLimit { hops, limit });
    }
    Ok(())
}

pub(crate) async fn write_chain(
    conn: &Connector,
    codec: &impl Codec,
    headers: &[ForwardHeader],
) -> Result<(), RouteError> {
    for header in headers {
        write_value(conn, codec, header).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_depth_at_limit_passes() {
        assert!(check_depth(16, 16).is_ok());
    }

    #[test]
    fn test_check_depth_over_limit_refused() {
        let err = check_depth(17, 16).unwrap_err();
        assert!(matches!(err, RouteError::HopLimit { hops: 17, limit: 16 }));
    }
}
