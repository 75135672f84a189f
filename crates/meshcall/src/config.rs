//! Node configuration loaded from TOML.
//!
//! Every section is optional; missing values fall back to the defaults
//! below. Durations are whole milliseconds.
//!
//! ```toml
//! system = 42
//! listen = "0.0.0.0:7600"
//! gateway = "ws://gateway.local:7700"
//!
//! [fragment]
//! timeout_ms = 3000
//!
//! [invoke]
//! retry_connect = 2
//! retry_backoff_ms = 50
//! disposal_timeout_ms = 5000
//!
//! [router]
//! direct_timeout_ms = 1000
//! indirect_suppression_ms = 60000
//! gateway_retry_ms = 10000
//! announce_interval_ms = 5000
//! max_hops = 8
//! depth_multiple = 2
//! ```

use std::path::Path;
use std::time::Duration;

use meshcall_fragment::FragmentConfig;
use meshcall_invoke::InvokeConfig;
use meshcall_protocol::{SystemId, TransportDescription};
use meshcall_route::RouterConfig;
use serde::{Deserialize, Serialize};

use crate::net::WEBSOCKET_KIND;
use crate::MeshError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Fixed system id. A random one is drawn when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<u64>,
    /// Address the WebSocket listener binds to, e.g. `0.0.0.0:7600`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    /// WebSocket URL of the gateway server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    pub fragment: FragmentSection,
    pub invoke: InvokeSection,
    pub router: RouterSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentSection {
    pub timeout_ms: u64,
}

impl Default for FragmentSection {
    fn default() -> Self {
        Self { timeout_ms: 3000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokeSection {
    pub retry_connect: u32,
    pub retry_backoff_ms: u64,
    pub disposal_timeout_ms: u64,
}

impl Default for InvokeSection {
    fn default() -> Self {
        Self {
            retry_connect: 2,
            retry_backoff_ms: 50,
            disposal_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    pub direct_timeout_ms: u64,
    pub indirect_suppression_ms: u64,
    pub gateway_retry_ms: u64,
    pub announce_interval_ms: u64,
    pub max_hops: u32,
    pub depth_multiple: u32,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            direct_timeout_ms: 1000,
            indirect_suppression_ms: 60_000,
            gateway_retry_ms: 10_000,
            announce_interval_ms: 5000,
            max_hops: 8,
            depth_multiple: 2,
        }
    }
}

impl MeshConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, MeshError> {
        toml::from_str(text).map_err(|e| MeshError::Config(e.to_string()))
    }

    /// Reads and parses a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MeshError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, MeshError> {
        toml::to_string_pretty(self).map_err(|e| MeshError::Config(e.to_string()))
    }

    /// The configured system id, or a fresh random one.
    pub fn system_id(&self) -> SystemId {
        self.system.map(SystemId).unwrap_or_else(SystemId::random)
    }

    pub fn fragment_config(&self) -> FragmentConfig {
        FragmentConfig {
            timeout: Duration::from_millis(self.fragment.timeout_ms),
        }
    }

    pub fn invoke_config(&self) -> InvokeConfig {
        InvokeConfig {
            retry_connect: self.invoke.retry_connect,
            retry_backoff: Duration::from_millis(self.invoke.retry_backoff_ms),
            disposal_timeout: Duration::from_millis(self.invoke.disposal_timeout_ms),
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        let router = &self.router;
        RouterConfig {
            direct_timeout: Duration::from_millis(router.direct_timeout_ms),
            indirect_suppression: Duration::from_millis(router.indirect_suppression_ms),
            gateway_retry: Duration::from_millis(router.gateway_retry_ms),
            announce_interval: Duration::from_millis(router.announce_interval_ms),
            max_hops: router.max_hops,
            depth_multiple: router.depth_multiple,
            gateway: self
                .gateway
                .as_ref()
                .map(|url| TransportDescription::new(WEBSOCKET_KIND, url.as_str())),
        }
    }
}
