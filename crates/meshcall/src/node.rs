//! A meshcall node: router plus invocation semantics.

use std::sync::Arc;

use meshcall_fragment::{FragmentConfig, Fragmenter};
use meshcall_invoke::{InvocationSemantic, StreamSemantic};
use meshcall_protocol::{Codec, Invocation, SemanticKind, SystemId};
use meshcall_route::{LocalSession, Router};
use meshcall_session::{PluginManager, Registry, RouteTable, SessionOpener};
use meshcall_transport::{Connector, PacketChannel, Transport};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{MeshConfig, MeshError};

type Invocations<M, T, R, C> = InvocationSemantic<Router<M, T, C>, Arc<R>, C>;
type Streams<M, T, R, C> = StreamSemantic<Router<M, T, C>, Arc<R>, C>;

/// One participant of the mesh.
///
/// Outgoing calls go through the semantics, which open their sessions
/// through the router. Sessions the router terminates locally are handed
/// to the semantic named by their requirements.
///
/// # Example
///
/// ```rust,ignore
/// let config = MeshConfig::from_file("meshcall.toml")?;
/// let plugins = Arc::new(WebSocketPlugins::new(config.system_id(), vec![]));
/// let node = Node::new(plugins, StaticRoutes::new(), MyRegistry, JsonCodec, &config);
/// node.start();
/// let done = node.invoke(call).await;
/// ```
pub struct Node<M, T, R, C> {
    router: Router<M, T, C>,
    invocations: Invocations<M, T, R, C>,
    streams: Streams<M, T, R, C>,
    fragment: FragmentConfig,
    cancel: CancellationToken,
}

impl<M, T, R, C> Node<M, T, R, C>
where
    M: PluginManager,
    T: RouteTable,
    R: Registry,
    C: Codec,
{
    /// Builds the node and starts dispatching local sessions.
    pub fn new(manager: M, routes: T, registry: R, codec: C, config: &MeshConfig) -> Self {
        let local = manager.local_system();
        let registry = Arc::new(registry);
        let (router, sessions) = Router::new(manager, routes, codec.clone(), config.router_config());
        let invocations = InvocationSemantic::new(
            local,
            router.clone(),
            Arc::clone(&registry),
            codec.clone(),
            config.invoke_config(),
        );
        let streams = StreamSemantic::new(local, router.clone(), registry, codec, config.invoke_config());
        let cancel = CancellationToken::new();

        tokio::spawn(dispatch_local(
            sessions,
            invocations.clone(),
            streams.clone(),
            cancel.clone(),
        ));
        info!(system = %local, "node created");

        Self {
            router,
            invocations,
            streams,
            fragment: config.fragment_config(),
            cancel,
        }
    }

    pub fn local_system(&self) -> SystemId {
        self.router.local_system()
    }

    pub fn router(&self) -> &Router<M, T, C> {
        &self.router
    }

    pub fn invocations(&self) -> &Invocations<M, T, R, C> {
        &self.invocations
    }

    /// Lifts a small-packet channel to one carrying whole logical packets.
    ///
    /// Fragments are tagged with this node's system id and reassembled
    /// with the `[fragment]` timeout. A packet plug-in builds its
    /// connectors on top of the result.
    pub fn fragment<P: PacketChannel>(&self, channel: P) -> Fragmenter<P> {
        Fragmenter::new(channel, self.local_system(), self.fragment.clone())
    }

    /// Starts the gateway keep-alive, if a gateway is configured.
    pub fn start(&self) {
        self.router.start();
    }

    /// Carries out a marshalled call. Failures come back as a fault on
    /// the returned invocation.
    pub async fn invoke(&self, invocation: Invocation) -> Invocation {
        self.invocations.invoke(invocation).await
    }

    /// Opens a raw stream to the object `invocation` targets.
    pub async fn open_stream(&self, invocation: Invocation) -> Result<Connector, MeshError> {
        Ok(self.streams.open(invocation).await?)
    }

    /// Handles a connector accepted from any transport.
    pub async fn accept(&self, conn: Connector) -> Result<(), MeshError> {
        Ok(self.router.accept_connector(conn).await?)
    }

    /// Accepts connections from `transport` until [`Node::shutdown`].
    pub async fn listen<X: Transport>(&self, mut transport: X) -> Result<(), MeshError> {
        info!(system = %self.local_system(), "node listening");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = transport.accept() => match accepted {
                    Ok(conn) => {
                        let conn = Connector::spawn(conn);
                        let router = self.router.clone();
                        tokio::spawn(async move {
                            let id = conn.id();
                            if let Err(e) = router.accept_connector(conn).await {
                                debug!(conn_id = %id, error = %e, "incoming session refused");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                },
            }
        }
        if let Err(e) = transport.shutdown().await {
            debug!(error = %e, "transport shutdown failed");
        }
        Ok(())
    }

    /// Stops the router, the local dispatcher and any listener.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.router.shutdown();
    }
}

async fn dispatch_local<O, R, C>(
    mut sessions: mpsc::Receiver<LocalSession>,
    invocations: InvocationSemantic<O, R, C>,
    streams: StreamSemantic<O, R, C>,
    cancel: CancellationToken,
) where
    O: SessionOpener,
    R: Registry,
    C: Codec,
{
    loop {
        let session = tokio::select! {
            _ = cancel.cancelled() => break,
            session = sessions.recv() => match session {
                Some(session) => session,
                None => break,
            },
        };
        let conn = session.connector;
        match session.requirements.semantic {
            SemanticKind::Marshalled => {
                let invocations = invocations.clone();
                tokio::spawn(async move { invocations.accept(conn).await });
            }
            SemanticKind::Stream => {
                let streams = streams.clone();
                tokio::spawn(async move { streams.accept(conn).await });
            }
        }
    }
    debug!("local dispatch stopped");
}
