//! The gateway server: a rendezvous point for systems that cannot reach
//! each other directly.
//!
//! Every client keeps one multiplexed link open. Its first stream is the
//! control stream (a [`GatewayHello`], then [`Announcement`]s); every
//! further stream it opens is a route request:
//!
//! ```text
//! client → RouteRequest
//! server → u32 count, TransportDescription × count   (from the target's hello)
//! client → bool relay
//!          false: done, the client connected directly
//!          true:  server opens a stream to the client owning the target,
//!                 writes a RelayHeader and splices the two streams
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use meshcall_protocol::{
    read_value, write_value, Announcement, Codec, GatewayHello, RelayHeader, RouteRequest,
    SystemId, TransportDescription,
};
use meshcall_transport::{Connector, Transport};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::router::check_depth;
use crate::{splice, Mux, MuxRole, RouteError, RouterConfig};

struct Client {
    mux: Mux,
    descriptions: Vec<TransportDescription>,
    reachable: BTreeSet<SystemId>,
    link: u64,
}

struct ServerState<C> {
    codec: C,
    hop_limit: u32,
    clients: Mutex<HashMap<SystemId, Client>>,
    next_link: AtomicU64,
    cancel: CancellationToken,
}

impl<C: Codec> ServerState<C> {
    fn clients(&self) -> MutexGuard<'_, HashMap<SystemId, Client>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The link a relay to `target` goes through: the target's own link,
    /// else any other client that announced it.
    fn relay_for(&self, target: SystemId, from: SystemId) -> Option<Mux> {
        let clients = self.clients();
        if let Some(client) = clients.get(&target) {
            return Some(client.mux.clone());
        }
        clients
            .iter()
            .find(|(system, client)| **system != from && client.reachable.contains(&target))
            .map(|(_, client)| client.mux.clone())
    }
}

/// Relays sessions between connected clients. Cheap to clone.
pub struct GatewayServer<C> {
    state: Arc<ServerState<C>>,
}

impl<C> Clone for GatewayServer<C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<C: Codec> GatewayServer<C> {
    /// Creates a server. Only `config.hop_limit()` is used.
    pub fn new(codec: C, config: &RouterConfig) -> Self {
        Self {
            state: Arc::new(ServerState {
                codec,
                hop_limit: config.hop_limit(),
                clients: Mutex::new(HashMap::new()),
                next_link: AtomicU64::new(1),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Accepts connections from `transport` until [`GatewayServer::shutdown`].
    pub async fn serve<T: Transport>(&self, mut transport: T) -> Result<(), RouteError> {
        info!("gateway server running");
        loop {
            tokio::select! {
                _ = self.state.cancel.cancelled() => break,
                accepted = transport.accept() => match accepted {
                    Ok(conn) => self.attach(Connector::spawn(conn)),
                    Err(e) => error!(error = %e, "accept failed"),
                },
            }
        }
        if let Err(e) = transport.shutdown().await {
            warn!(error = %e, "transport shutdown failed");
        }
        info!("gateway server stopped");
        Ok(())
    }

    /// Serves one client link.
    pub fn attach(&self, conn: Connector) {
        let (mux, incoming) = Mux::new(conn, self.state.codec.clone(), MuxRole::Server);
        let state = Arc::clone(&self.state);
        tokio::spawn(handle_client(state, mux, incoming));
    }

    /// Systems with a registered link.
    pub fn clients(&self) -> BTreeSet<SystemId> {
        self.state.clients().keys().copied().collect()
    }

    /// Systems `client` last announced as reachable.
    pub fn reachable_from(&self, client: SystemId) -> BTreeSet<SystemId> {
        self.state
            .clients()
            .get(&client)
            .map(|c| c.reachable.clone())
            .unwrap_or_default()
    }

    /// Stops accepting, closes every client link and every relay.
    pub fn shutdown(&self) {
        self.state.cancel.cancel();
        for (_, client) in self.state.clients().drain() {
            client.mux.close();
        }
    }
}

async fn handle_client<C: Codec>(
    state: Arc<ServerState<C>>,
    mux: Mux,
    mut incoming: mpsc::Receiver<Connector>,
) {
    let Some(mut control) = incoming.recv().await else {
        return;
    };
    let hello: GatewayHello = match read_value(&mut control, &state.codec).await {
        Ok(hello) => hello,
        Err(e) => {
            warn!(error = %e, "client sent no hello");
            mux.close();
            return;
        }
    };
    let system = hello.system;
    let link = state.next_link.fetch_add(1, Ordering::Relaxed);
    let replaced = state.clients().insert(
        system,
        Client {
            mux: mux.clone(),
            descriptions: hello.descriptions,
            reachable: BTreeSet::new(),
            link,
        },
    );
    if let Some(old) = replaced {
        debug!(%system, "replacing previous link");
        old.mux.close();
    }
    info!(%system, "gateway client registered");

    loop {
        tokio::select! {
            _ = state.cancel.cancelled() => break,
            change = read_value::<Announcement>(&mut control, &state.codec) => match change {
                Ok(change) => {
                    if let Some(client) = state.clients().get_mut(&system) {
                        if change.added {
                            client.reachable.insert(change.system);
                        } else {
                            client.reachable.remove(&change.system);
                        }
                    }
                }
                Err(e) => {
                    debug!(%system, error = %e, "control stream ended");
                    break;
                }
            },
            stream = incoming.recv() => match stream {
                Some(stream) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = route_request(&state, system, stream).await {
                            debug!(from = %system, error = %e, "route request failed");
                        }
                    });
                }
                None => break,
            },
        }
    }

    {
        let mut clients = state.clients();
        if clients.get(&system).is_some_and(|c| c.link == link) {
            clients.remove(&system);
        }
    }
    mux.close();
    info!(%system, "gateway client left");
}

async fn route_request<C: Codec>(
    state: &Arc<ServerState<C>>,
    from: SystemId,
    mut stream: Connector,
) -> Result<(), RouteError> {
    let request: RouteRequest = read_value(&mut stream, &state.codec).await?;
    if let Err(e) = check_depth(request.depth, state.hop_limit) {
        warn!(%from, target = %request.target, depth = request.depth, "route request refused");
        return Err(e);
    }

    let descriptions = state
        .clients()
        .get(&request.target)
        .map(|c| c.descriptions.clone())
        .unwrap_or_default();
    write_value(&stream, &state.codec, &(descriptions.len() as u32)).await?;
    for description in &descriptions {
        write_value(&stream, &state.codec, description).await?;
    }

    let relay: bool = read_value(&mut stream, &state.codec).await?;
    if !relay {
        debug!(%from, target = %request.target, "client connected directly");
        return Ok(());
    }

    let mux = state
        .relay_for(request.target, from)
        .ok_or_else(|| RouteError::Unreachable {
            system: request.target,
            reason: "no gateway client owns or reaches it".into(),
        })?;
    let onward = mux.open().await?;
    let header = RelayHeader {
        requirements: request.requirements,
        target: request.target,
        depth: request.depth.saturating_add(1),
    };
    write_value(&onward, &state.codec, &header).await?;
    debug!(%from, target = %request.target, depth = header.depth, "relaying");
    splice(stream, onward, &state.cancel);
    Ok(())
}
