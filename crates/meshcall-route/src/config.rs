//! Router configuration.

use std::time::Duration;

use meshcall_protocol::TransportDescription;

/// Tunables for the [`Router`](crate::Router) and the
/// [`GatewayServer`](crate::GatewayServer).
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// How long a direct connection attempt may take before the gateway
    /// relay is used instead. Default: 1000 ms.
    pub direct_timeout: Duration,
    /// How long a failed direct attempt suppresses further attempts to the
    /// same system. Default: 60 000 ms.
    pub indirect_suppression: Duration,
    /// Pause before reconnecting to the gateway after a failure.
    /// Default: 10 000 ms.
    pub gateway_retry: Duration,
    /// How often reachable-system changes are announced to the gateway.
    /// Default: 5000 ms.
    pub announce_interval: Duration,
    /// Longest route this router expects. Default: 8.
    pub max_hops: u32,
    /// Forwarded requests may travel `max_hops * depth_multiple` hops
    /// before they are refused. Default: 2.
    pub depth_multiple: u32,
    /// Where the gateway server listens. `None` disables the gateway.
    pub gateway: Option<TransportDescription>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            direct_timeout: Duration::from_millis(1000),
            indirect_suppression: Duration::from_millis(60_000),
            gateway_retry: Duration::from_millis(10_000),
            announce_interval: Duration::from_millis(5000),
            max_hops: 8,
            depth_multiple: 2,
            gateway: None,
        }
    }
}

impl RouterConfig {
    /// Hop count beyond which forwarded requests are refused.
    pub fn hop_limit(&self) -> u32 {
        self.max_hops.saturating_mul(self.depth_multiple)
    }

    pub fn with_gateway(mut self, gateway: TransportDescription) -> Self {
        self.gateway = Some(gateway);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hop_limit_is_sixteen() {
        assert_eq!(RouterConfig::default().hop_limit(), 16);
    }

    #[test]
    fn test_hop_limit_saturates() {
        let config = RouterConfig {
            max_hops: u32::MAX,
            ..RouterConfig::default()
        };
        assert_eq!(config.hop_limit(), u32::MAX);
    }
}
