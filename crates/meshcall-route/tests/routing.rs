//! Routing scenarios over an in-memory network.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshcall_protocol::{
    read_value, write_value, ForwardHeader, GatewayHello, JsonCodec, NfCollection, RelayHeader,
    Route, RouteRequest, SystemId, TransportDescription,
};
use meshcall_route::{GatewayServer, LocalSession, Mux, MuxRole, RouteError, Router, RouterConfig};
use meshcall_session::{PluginManager, SessionError, SessionOpener, StaticRoutes};
use meshcall_transport::Connector;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

const GATEWAY: &str = "gateway";

fn mem(address: &str) -> TransportDescription {
    TransportDescription::new("mem", address)
}

fn address(id: u64) -> String {
    format!("node-{id}")
}

#[derive(Default)]
struct NetState {
    listeners: HashMap<String, mpsc::UnboundedSender<Connector>>,
    refused: HashSet<String>,
    hanging: HashSet<String>,
    dials: HashMap<String, usize>,
}

/// Addresses mapped to listeners. Dialing wires a connector pair.
#[derive(Default)]
struct Network {
    state: Mutex<NetState>,
}

impl Network {
    fn listen(&self, address: &str) -> mpsc::UnboundedReceiver<Connector> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().listeners.insert(address.to_string(), tx);
        rx
    }

    fn refuse(&self, address: &str) {
        self.state.lock().unwrap().refused.insert(address.to_string());
    }

    fn hang(&self, address: &str) {
        self.state.lock().unwrap().hanging.insert(address.to_string());
    }

    fn dials(&self, address: &str) -> usize {
        self.state.lock().unwrap().dials.get(address).copied().unwrap_or(0)
    }

    async fn dial(&self, address: &str) -> Result<Connector, SessionError> {
        let (hanging, listener) = {
            let mut state = self.state.lock().unwrap();
            *state.dials.entry(address.to_string()).or_default() += 1;
            let listener = if state.refused.contains(address) {
                None
            } else {
                state.listeners.get(address).cloned()
            };
            (state.hanging.contains(address), listener)
        };
        if hanging {
            std::future::pending::<()>().await;
        }
        let listener = listener.ok_or_else(|| SessionError::Refused(format!("{address} refused")))?;
        let (near, far) = Connector::pair();
        listener
            .send(far)
            .map_err(|_| SessionError::Refused(format!("{address} gone")))?;
        Ok(near)
    }
}

struct MemManager {
    system: SystemId,
    net: Arc<Network>,
    neighbours: Mutex<HashMap<SystemId, Vec<TransportDescription>>>,
}

impl MemManager {
    fn see(&self, system: SystemId) {
        self.neighbours
            .lock()
            .unwrap()
            .insert(system, vec![mem(&address(system.0))]);
    }
}

impl PluginManager for MemManager {
    fn local_system(&self) -> SystemId {
        self.system
    }

    fn local_descriptions(&self) -> Vec<TransportDescription> {
        vec![mem(&address(self.system.0))]
    }

    fn descriptions(&self, system: SystemId) -> Vec<TransportDescription> {
        self.neighbours
            .lock()
            .unwrap()
            .get(&system)
            .cloned()
            .unwrap_or_default()
    }

    fn reachable_systems(&self) -> BTreeSet<SystemId> {
        self.neighbours.lock().unwrap().keys().copied().collect()
    }

    async fn connect(&self, description: &TransportDescription) -> Result<Connector, SessionError> {
        if description.kind != "mem" {
            return Err(SessionError::Refused(format!("no plug-in for {description}")));
        }
        self.net.dial(&description.address).await
    }
}

type MemRouter = Router<Arc<MemManager>, Arc<StaticRoutes>, JsonCodec>;

struct TestNode {
    system: SystemId,
    router: MemRouter,
    manager: Arc<MemManager>,
    routes: Arc<StaticRoutes>,
    local: mpsc::Receiver<LocalSession>,
}

impl TestNode {
    async fn next_local(&mut self) -> LocalSession {
        timeout(Duration::from_secs(5), self.local.recv())
            .await
            .expect("no local session")
            .expect("router gone")
    }
}

fn node(net: &Arc<Network>, id: u64, config: RouterConfig) -> TestNode {
    let system = SystemId(id);
    let manager = Arc::new(MemManager {
        system,
        net: Arc::clone(net),
        neighbours: Mutex::new(HashMap::new()),
    });
    let routes = Arc::new(StaticRoutes::new());
    let (router, local) = Router::new(Arc::clone(&manager), Arc::clone(&routes), JsonCodec, config);

    let mut incoming = net.listen(&address(id));
    let acceptor = router.clone();
    tokio::spawn(async move {
        while let Some(conn) = incoming.recv().await {
            let router = acceptor.clone();
            tokio::spawn(async move {
                let _ = router.accept_connector(conn).await;
            });
        }
    });

    TestNode {
        system,
        router,
        manager,
        routes,
        local,
    }
}

fn gateway(net: &Arc<Network>) -> GatewayServer<JsonCodec> {
    let server = GatewayServer::new(JsonCodec, &RouterConfig::default());
    let mut incoming = net.listen(GATEWAY);
    let acceptor = server.clone();
    tokio::spawn(async move {
        while let Some(conn) = incoming.recv().await {
            acceptor.attach(conn);
        }
    });
    server
}

fn gateway_config() -> RouterConfig {
    RouterConfig::default().with_gateway(mem(GATEWAY))
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Sends `ping` from `session`, expects it at `remote`, answers `pong`.
async fn assert_connected(session: &mut Connector, remote: &mut TestNode) {
    session.send(b"ping".to_vec()).await.unwrap();
    let mut delivered = remote.next_local().await;
    assert_eq!(delivered.connector.recv().await.unwrap(), b"ping");
    delivered.connector.send(b"pong".to_vec()).await.unwrap();
    assert_eq!(session.recv().await.unwrap(), b"pong");
}

#[tokio::test]
async fn test_open_direct_neighbour_delivers_local_session() {
    let net = Arc::new(Network::default());
    let a = node(&net, 1, RouterConfig::default());
    let mut b = node(&net, 2, RouterConfig::default());
    a.manager.see(b.system);

    let mut session = a.router.open(b.system, &NfCollection::default()).await.unwrap();

    assert_connected(&mut session, &mut b).await;
    assert_eq!(net.dials(&address(2)), 1);
}

#[tokio::test]
async fn test_open_local_target_never_dials() {
    let net = Arc::new(Network::default());
    let mut a = node(&net, 1, RouterConfig::default());

    let requirements = NfCollection::stream();
    let session = a.router.open(a.system, &requirements).await.unwrap();
    let delivered = a.next_local().await;

    assert_eq!(delivered.requirements, requirements);
    session.send(b"self".to_vec()).await.unwrap();
    let mut far = delivered.connector;
    assert_eq!(far.recv().await.unwrap(), b"self");
    assert_eq!(net.dials(&address(1)), 0);
}

#[tokio::test]
async fn test_open_multi_hop_route_forwards_through_each_hop() {
    let net = Arc::new(Network::default());
    let a = node(&net, 1, RouterConfig::default());
    let b = node(&net, 2, RouterConfig::default());
    let mut c = node(&net, 3, RouterConfig::default());
    a.manager.see(b.system);
    b.manager.see(c.system);
    a.routes.insert(Route::new(vec![b.system, c.system]).unwrap());

    let mut session = a.router.open(c.system, &NfCollection::default()).await.unwrap();

    assert_connected(&mut session, &mut c).await;
    assert_eq!(net.dials(&address(2)), 1);
    assert_eq!(net.dials(&address(3)), 1);
}

#[tokio::test]
async fn test_open_session_through_opener_trait() {
    let net = Arc::new(Network::default());
    let a = node(&net, 1, RouterConfig::default());
    let mut b = node(&net, 2, RouterConfig::default());
    a.manager.see(b.system);

    let mut session = a
        .router
        .open_session(b.system, &NfCollection::default())
        .await
        .unwrap();

    assert_connected(&mut session, &mut b).await;
}

#[tokio::test]
async fn test_open_unknown_target_without_gateway_is_no_route() {
    let net = Arc::new(Network::default());
    let a = node(&net, 1, RouterConfig::default());

    let err = a.router.open(SystemId(9), &NfCollection::default()).await.unwrap_err();

    assert!(matches!(err, RouteError::Session(SessionError::NoRoute(SystemId(9)))));
}

#[tokio::test]
async fn test_open_route_longer_than_limit_refused() {
    let net = Arc::new(Network::default());
    let config = RouterConfig {
        max_hops: 1,
        ..RouterConfig::default()
    };
    let a = node(&net, 1, config);
    a.manager.see(SystemId(2));
    a.routes
        .insert(Route::new(vec![SystemId(2), SystemId(3), SystemId(4)]).unwrap());

    let err = a.router.open(SystemId(4), &NfCollection::default()).await.unwrap_err();

    assert!(matches!(err, RouteError::HopLimit { hops: 3, limit: 2 }));
    assert_eq!(net.dials(&address(2)), 0);
}

#[tokio::test]
async fn test_accept_connector_over_hop_limit_refused_without_forwarding() {
    let net = Arc::new(Network::default());
    let a = node(&net, 1, RouterConfig::default());
    a.manager.see(SystemId(3));
    let (mut near, far) = Connector::pair();
    let header = ForwardHeader {
        requirements: NfCollection::default(),
        hops: 17,
        next_hop: Some(SystemId(3)),
    };
    write_value(&near, &JsonCodec, &header).await.unwrap();

    let err = a.router.accept_connector(far).await.unwrap_err();

    assert!(matches!(err, RouteError::HopLimit { hops: 17, limit: 16 }));
    assert_eq!(net.dials(&address(3)), 0);
    assert!(near.recv().await.is_err());
}

#[tokio::test]
async fn test_accept_connector_malformed_header_refused() {
    let net = Arc::new(Network::default());
    let a = node(&net, 1, RouterConfig::default());
    let (near, far) = Connector::pair();
    near.send(b"not a header".to_vec()).await.unwrap();

    let err = a.router.accept_connector(far).await.unwrap_err();

    assert!(matches!(err, RouteError::Protocol(_)));
}

#[tokio::test]
async fn test_start_registers_with_gateway_and_stop_leaves() {
    let net = Arc::new(Network::default());
    let server = gateway(&net);
    let a = node(&net, 1, gateway_config());

    a.router.start();
    eventually(|| server.clients().contains(&a.system)).await;
    assert!(a.router.has_gateway());

    a.router.stop();
    eventually(|| !server.clients().contains(&a.system)).await;
    assert!(!a.router.has_gateway());
}

#[tokio::test]
async fn test_keep_alive_announces_reachable_systems() {
    let net = Arc::new(Network::default());
    let server = gateway(&net);
    let config = RouterConfig {
        announce_interval: Duration::from_millis(20),
        ..gateway_config()
    };
    let a = node(&net, 1, config);
    a.manager.see(SystemId(7));

    a.router.start();
    eventually(|| server.reachable_from(a.system).contains(&SystemId(7))).await;

    a.manager.neighbours.lock().unwrap().remove(&SystemId(7));
    eventually(|| server.reachable_from(a.system).is_empty()).await;
    a.router.stop();
}

#[tokio::test]
async fn test_open_upgrades_to_direct_and_releases_gateway_stream() {
    let net = Arc::new(Network::default());
    let server = gateway(&net);
    let a = node(&net, 1, gateway_config());
    let mut b = node(&net, 2, gateway_config());
    a.router.start();
    b.router.start();
    eventually(|| server.clients().len() == 2 && a.router.has_gateway()).await;

    // A has no local description for B; the gateway supplies B's.
    let mut session = a.router.open(b.system, &NfCollection::default()).await.unwrap();

    assert_connected(&mut session, &mut b).await;
    assert_eq!(net.dials(&address(2)), 1);
    assert!(!a.router.marks().is_suppressed(b.system, Instant::now()));
    let link = a.router.gateway_link().unwrap();
    eventually(|| link.stream_count() == 1).await;
}

#[tokio::test]
async fn test_open_falls_back_to_relay_and_marks_target() {
    let net = Arc::new(Network::default());
    let server = gateway(&net);
    let a = node(&net, 1, gateway_config());
    let mut b = node(&net, 2, gateway_config());
    net.refuse(&address(2));
    a.router.start();
    b.router.start();
    eventually(|| server.clients().len() == 2 && a.router.has_gateway()).await;

    let mut session = a.router.open(b.system, &NfCollection::default()).await.unwrap();

    assert_connected(&mut session, &mut b).await;
    assert!(a.router.marks().is_suppressed(b.system, Instant::now()));

    // While marked, the next session skips the direct attempt.
    let mut again = a.router.open(b.system, &NfCollection::default()).await.unwrap();
    assert_connected(&mut again, &mut b).await;
    assert_eq!(net.dials(&address(2)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_direct_attempt_timeout_uses_relay() {
    let net = Arc::new(Network::default());
    let server = gateway(&net);
    let a = node(&net, 1, gateway_config());
    let mut b = node(&net, 2, gateway_config());
    net.hang(&address(2));
    a.router.start();
    b.router.start();
    eventually(|| server.clients().len() == 2 && a.router.has_gateway()).await;

    let started = Instant::now();
    let mut session = a.router.open(b.system, &NfCollection::default()).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert_connected(&mut session, &mut b).await;
    assert!(a.router.marks().is_suppressed(b.system, Instant::now()));
}

#[tokio::test]
async fn test_relay_reaches_system_announced_by_another_client() {
    let net = Arc::new(Network::default());
    let server = gateway(&net);
    let a = node(&net, 1, gateway_config());
    let b = node(&net, 2, gateway_config());
    // C has no gateway link; only B can see it.
    let mut c = node(&net, 3, RouterConfig::default());
    b.manager.see(c.system);
    a.router.start();
    b.router.start();
    eventually(|| server.reachable_from(b.system).contains(&c.system) && a.router.has_gateway())
        .await;

    let mut session = a.router.open(c.system, &NfCollection::default()).await.unwrap();

    assert_connected(&mut session, &mut c).await;
    assert_eq!(net.dials(&address(3)), 1);
}

async fn raw_client(server: &GatewayServer<JsonCodec>, hello: GatewayHello) -> (Mux, Connector) {
    let (client_end, server_end) = Connector::pair();
    server.attach(server_end);
    let (mux, _incoming) = Mux::new(client_end, JsonCodec, MuxRole::Client);
    let control = mux.open().await.unwrap();
    write_value(&control, &JsonCodec, &hello).await.unwrap();
    (mux, control)
}

#[tokio::test]
async fn test_open_relay_after_oversized_description_list_carries_only_session_data() {
    let net = Arc::new(Network::default());
    let server = gateway(&net);
    let a = node(&net, 1, gateway_config());
    a.router.start();
    // Nothing listens on any of these, so every direct dial is refused.
    let (target_end, server_end) = Connector::pair();
    server.attach(server_end);
    let (target_link, mut relayed) = Mux::new(target_end, JsonCodec, MuxRole::Client);
    let control = target_link.open().await.unwrap();
    let hello = GatewayHello {
        system: SystemId(6),
        descriptions: (0..70).map(|i| mem(&format!("gone-{i}"))).collect(),
    };
    write_value(&control, &JsonCodec, &hello).await.unwrap();
    eventually(|| server.clients().len() == 2 && a.router.has_gateway()).await;

    let mut session = a.router.open(SystemId(6), &NfCollection::default()).await.unwrap();
    let mut inbound = timeout(Duration::from_secs(5), relayed.recv()).await.unwrap().unwrap();
    let header: RelayHeader = read_value(&mut inbound, &JsonCodec).await.unwrap();
    let _terminal: ForwardHeader = read_value(&mut inbound, &JsonCodec).await.unwrap();
    inbound.send(b"pong".to_vec()).await.unwrap();

    assert_eq!(header.target, SystemId(6));
    assert_eq!(session.recv().await.unwrap(), b"pong");
    assert_eq!(net.dials("gone-64"), 0);
}

#[tokio::test]
async fn test_gateway_answers_with_target_descriptions() {
    let server = GatewayServer::new(JsonCodec, &RouterConfig::default());
    let (_target, _target_control) = raw_client(
        &server,
        GatewayHello {
            system: SystemId(6),
            descriptions: vec![mem("node-6")],
        },
    )
    .await;
    let (asker, _control) = raw_client(
        &server,
        GatewayHello {
            system: SystemId(5),
            descriptions: vec![],
        },
    )
    .await;
    eventually(|| server.clients().len() == 2).await;

    let mut stream = asker.open().await.unwrap();
    let request = RouteRequest {
        requirements: NfCollection::default(),
        target: SystemId(6),
        depth: 0,
    };
    write_value(&stream, &JsonCodec, &request).await.unwrap();

    let count: u32 = read_value(&mut stream, &JsonCodec).await.unwrap();
    let description: TransportDescription = read_value(&mut stream, &JsonCodec).await.unwrap();
    assert_eq!(count, 1);
    assert_eq!(description, mem("node-6"));

    write_value(&stream, &JsonCodec, &false).await.unwrap();
    assert!(stream.recv().await.is_err());
}

#[tokio::test]
async fn test_gateway_refuses_request_over_depth_limit() {
    let server = GatewayServer::new(JsonCodec, &RouterConfig::default());
    let (asker, _control) = raw_client(
        &server,
        GatewayHello {
            system: SystemId(5),
            descriptions: vec![],
        },
    )
    .await;
    eventually(|| server.clients().len() == 1).await;

    let mut stream = asker.open().await.unwrap();
    let request = RouteRequest {
        requirements: NfCollection::default(),
        target: SystemId(6),
        depth: 17,
    };
    write_value(&stream, &JsonCodec, &request).await.unwrap();

    assert!(stream.recv().await.is_err());
}

#[tokio::test]
async fn test_gateway_shutdown_drops_clients() {
    let server = GatewayServer::new(JsonCodec, &RouterConfig::default());
    let (mux, _control) = raw_client(
        &server,
        GatewayHello {
            system: SystemId(5),
            descriptions: vec![],
        },
    )
    .await;
    eventually(|| server.clients().len() == 1).await;

    server.shutdown();

    mux.closed().await;
    assert!(server.clients().is_empty());
}
