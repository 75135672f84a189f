//! Client side of the gateway: keep-alive, route requests and relayed
//! streams.

use std::collections::BTreeSet;
use std::sync::Arc;

use meshcall_protocol::{
    read_value, write_value, Announcement, Codec, ForwardHeader, GatewayHello, NfCollection,
    RelayHeader, Route, RouteRequest, SystemId, TransportDescription,
};
use meshcall_session::{PluginManager, RouteTable};
use meshcall_transport::Connector;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::router::{check_depth, write_chain, Shared};
use crate::{splice, Mux, MuxRole, RouteError};

/// Upper bound on descriptions read from one gateway answer.
const MAX_DESCRIPTIONS: u32 = 64;

/// Keeps a link to the gateway open until `cancel` fires.
pub(crate) async fn keep_alive<M, T, C>(
    shared: Arc<Shared<M, T, C>>,
    gateway: TransportDescription,
    cancel: CancellationToken,
) where
    M: PluginManager,
    T: RouteTable,
    C: Codec,
{
    info!(%gateway, "gateway keep-alive started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = shared.gateway_link(&gateway) => match result {
                Ok(()) => info!(%gateway, "gateway link closed"),
                Err(e) => warn!(%gateway, error = %e, "gateway link failed"),
            },
        }
        shared.set_gateway(None);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = time::sleep(shared.config.gateway_retry) => {}
        }
    }
    shared.set_gateway(None);
    info!(%gateway, "gateway keep-alive stopped");
}

impl<M, T, C> Shared<M, T, C>
where
    M: PluginManager,
    T: RouteTable,
    C: Codec,
{
    /// Runs one gateway link until it goes down.
    async fn gateway_link(self: &Arc<Self>, gateway: &TransportDescription) -> Result<(), RouteError> {
        let conn = self.manager.connect(gateway).await?;
        let (mux, mut incoming) = Mux::new(conn, self.codec.clone(), MuxRole::Client);
        let control = mux.open().await?;
        let hello = GatewayHello {
            system: self.local_system(),
            descriptions: self.manager.local_descriptions(),
        };
        write_value(&control, &self.codec, &hello).await?;
        self.set_gateway(Some(mux.clone()));
        info!(system = %hello.system, %gateway, "gateway link up");

        let mut announced = BTreeSet::new();
        let mut ticker = time::interval(self.config.announce_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.announce(&control, &mut announced).await?,
                stream = incoming.recv() => match stream {
                    Some(stream) => {
                        let shared = Arc::clone(self);
                        tokio::spawn(async move {
                            let id = stream.id();
                            if let Err(e) = shared.accept_relayed(stream).await {
                                debug!(conn_id = %id, error = %e, "relayed stream refused");
                            }
                        });
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    /// Sends the difference between what the gateway was last told and
    /// what the device registry sees now.
    async fn announce(
        &self,
        control: &Connector,
        announced: &mut BTreeSet<SystemId>,
    ) -> Result<(), RouteError> {
        let local = self.local_system();
        let mut current = self.manager.reachable_systems();
        current.remove(&local);

        let added = current.difference(announced).map(|&system| Announcement { added: true, system });
        let removed = announced.difference(&current).map(|&system| Announcement { added: false, system });
        let changes: Vec<Announcement> = added.chain(removed).collect();
        for change in &changes {
            write_value(control, &self.codec, change).await?;
        }
        if !changes.is_empty() {
            debug!(changes = changes.len(), reachable = current.len(), "announced");
        }
        *announced = current;
        Ok(())
    }

    /// Asks the gateway for `target` and races a direct dial against the
    /// relay.
    ///
    /// Returns either a direct connector (the gateway stream is released)
    /// or the relayed stream.
    pub(crate) async fn via_gateway(
        self: &Arc<Self>,
        target: SystemId,
        requirements: &NfCollection,
        depth: u32,
    ) -> Result<Connector, RouteError> {
        check_depth(depth, self.hop_limit())?;
        let mux = self.gateway().ok_or(RouteError::GatewayUnavailable)?;
        let mut stream = mux.open().await?;
        let request = RouteRequest {
            requirements: requirements.clone(),
            target,
            depth,
        };
        write_value(&stream, &self.codec, &request).await?;

        let count: u32 = read_value(&mut stream, &self.codec).await?;
        let mut descriptions = Vec::new();
        for index in 0..count {
            let description: TransportDescription = read_value(&mut stream, &self.codec).await?;
            // The rest are drained so the stream is clean if it becomes the relay.
            if index < MAX_DESCRIPTIONS {
                descriptions.push(description);
            }
        }
        if count > MAX_DESCRIPTIONS {
            debug!(%target, count, kept = MAX_DESCRIPTIONS, "gateway sent too many descriptions");
        }

        if !descriptions.is_empty() && !self.marks.is_suppressed(target, Instant::now()) {
            let attempt = time::timeout(
                self.config.direct_timeout,
                self.dial_any(target, &descriptions),
            );
            match attempt.await {
                Ok(Ok(direct)) => {
                    self.marks.clear(target);
                    if let Err(e) = write_value(&stream, &self.codec, &false).await {
                        debug!(%target, error = %e, "gateway gone before relay cancel");
                    }
                    stream.release();
                    info!(%target, conn_id = %direct.id(), "direct upgrade");
                    return Ok(direct);
                }
                Ok(Err(e)) => debug!(%target, error = %e, "direct attempt failed"),
                Err(_) => debug!(
                    %target,
                    timeout_ms = self.config.direct_timeout.as_millis() as u64,
                    "direct attempt timed out"
                ),
            }
            self.marks.mark(target, Instant::now());
        }

        write_value(&stream, &self.codec, &true).await?;
        debug!(%target, conn_id = %stream.id(), "relayed through gateway");
        Ok(stream)
    }

    /// Handles a stream the gateway opened toward this system.
    async fn accept_relayed(self: Arc<Self>, mut stream: Connector) -> Result<(), RouteError> {
        let header: RelayHeader = read_value(&mut stream, &self.codec).await?;
        let limit = self.hop_limit();
        check_depth(header.depth, limit)?;
        if header.target == self.local_system() {
            return self.accept_connector(stream, header.depth).await;
        }

        // Not ours: forward along our own route. The sender's stream still
        // carries the target's terminal header, so only the headers for
        // the intermediate hops are written here.
        let route = self
            .routes
            .route(header.target)
            .unwrap_or_else(|| Route::direct(header.target));
        check_depth(header.depth.saturating_add(route.len() as u32), limit)?;
        let onward = self
            .raw_connect(
                route.first_hop(),
                &header.requirements,
                header.depth,
                route.is_direct(),
            )
            .await?;
        let chain = ForwardHeader::chain(&header.requirements, &route);
        write_chain(&onward, &self.codec, &chain[..chain.len() - 1]).await?;
        debug!(
            target = %header.target,
            first_hop = %route.first_hop(),
            depth = header.depth,
            "forwarding relayed stream"
        );
        splice(stream, onward, &self.cancel);
        Ok(())
    }
}
