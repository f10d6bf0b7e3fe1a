use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Network;

/// Interval between transaction status queries while waiting for finalization.
pub const FINALIZATION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Number of credential indices probed when restoring accounts.
pub const RESTORE_PROBE_LIMIT: u32 = 200;

/// Pause between two account probes.
pub const RESTORE_PROBE_DELAY: Duration = Duration::from_millis(500);

/// Lifetime of a credential deployment transaction.
pub const CREDENTIAL_DEPLOYMENT_EXPIRY: Duration = Duration::from_secs(3600);

/// Lifetime of a simple transfer.
pub const TRANSFER_EXPIRY: Duration = Duration::from_secs(1000);

/// Endpoints and transport limits for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    /// Base URL of the node's gRPC-web endpoint.
    pub node_address: String,
    /// Port of the node endpoint.
    pub node_port: u16,
    /// Base URL of the wallet proxy, which lists identity providers.
    pub wallet_proxy_url: String,
    /// Per-request timeout, in milliseconds.
    pub timeout_ms: u64,
    /// Retries for transient HTTP failures (total attempts = `max_retries + 1`).
    pub max_retries: u32,
}

impl NetworkConfig {
    /// Returns the built-in configuration for `network`.
    #[must_use]
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Testnet => Self {
                node_address: "https://grpc.testnet.concordium.com".to_string(),
                node_port: 20000,
                wallet_proxy_url: "https://wallet-proxy.testnet.concordium.com".to_string(),
                timeout_ms: 30_000,
                max_retries: 3,
            },
            Network::Mainnet => Self {
                node_address: "https://grpc.mainnet.concordium.software".to_string(),
                node_port: 20001,
                wallet_proxy_url: "https://wallet-proxy.mainnet.concordium.software"
                    .to_string(),
                timeout_ms: 30_000,
                max_retries: 3,
            },
        }
    }

    /// The per-request timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
