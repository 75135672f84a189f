//! Standalone gateway server.
//!
//! ```text
//! meshcall-gateway [config.toml]
//! ```
//!
//! Listens on `listen` from the configuration (default `0.0.0.0:7700`)
//! and relays sessions between the nodes that connect to it.

use meshcall::protocol::JsonCodec;
use meshcall::route::GatewayServer;
use meshcall::telemetry::{init_tracing, DEFAULT_FILTER};
use meshcall::transport::WebSocketTransport;
use meshcall::{MeshConfig, MeshError};

const DEFAULT_LISTEN: &str = "0.0.0.0:7700";

#[tokio::main]
async fn main() -> Result<(), MeshError> {
    init_tracing(DEFAULT_FILTER)?;

    let config = match std::env::args().nth(1) {
        Some(path) => MeshConfig::from_file(path)?,
        None => MeshConfig::default(),
    };
    let listen = config.listen.as_deref().unwrap_or(DEFAULT_LISTEN);
    let transport = WebSocketTransport::bind(listen).await?;
    tracing::info!(addr = %transport.local_addr()?, "meshcall gateway listening");

    let server = GatewayServer::new(JsonCodec, &config.router_config());
    let shutdown = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            shutdown.shutdown();
        }
    });

    server.serve(transport).await?;
    Ok(())
}
