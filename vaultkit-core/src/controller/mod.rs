//! The `VaultController` is the main component hosts interact with. It owns the lifecycle state
//! and the connection to the node of the selected network.

use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::watch;

use crate::http_request::Request;
use crate::issuers::{IdentityObject, IdentityProvider, IdentityProviderClient, IssuerConfig};
use crate::{
    error::VaultKitError, AccountEntry, CryptoProvider, CryptographicParameters,
    FinalizationPoller, LifecycleState, Network, NetworkConfig, NodeClient, NodeConnector,
    NodeError, RetryPolicy, Seed, StateHandle, StateUpdate, RESTORE_PROBE_DELAY,
    RESTORE_PROBE_LIMIT,
};

mod accounts;
mod identity;
mod recovery;

pub use recovery::ScanOutcome;


/// How the account recovery scanner walks derivation indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPolicy {
    /// Number of indices probed, starting at zero.
    pub max_probe: u32,
    /// Pause after each probe.
    pub probe_delay: Duration,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            max_probe: RESTORE_PROBE_LIMIT,
            probe_delay: RESTORE_PROBE_DELAY,
        }
    }
}

/// Everything needed to bring up a controller, including previously persisted state.
#[derive(Debug)]
pub struct ControllerOptions {
    /// The wallet seed.
    pub seed: Seed,
    /// Network to connect to.
    pub network: Network,
    /// Replaces the built-in endpoints of `network`.
    pub endpoint: Option<NetworkConfig>,
    /// Identity index within the seed.
    pub identity_index: u32,
    /// Persisted identity provider.
    pub issuer: Option<IssuerConfig>,
    /// Persisted identity object. Requires `issuer`.
    pub identity: Option<IdentityObject>,
    /// Persisted credential counter.
    pub cred_counter: u32,
    /// Persisted accounts.
    pub accounts: Vec<AccountEntry>,
    /// Finalization polling behavior.
    pub polling: RetryPolicy,
    /// Account recovery scan behavior.
    pub scan: ScanPolicy,
}

impl ControllerOptions {
    /// Options for a fresh identity at index zero.
    #[must_use]
    pub fn new(seed: Seed, network: Network) -> Self {
        Self {
            seed,
            network,
            endpoint: None,
            identity_index: 0,
            issuer: None,
            identity: None,
            cred_counter: 0,
            accounts: Vec::new(),
            polling: RetryPolicy::default(),
            scan: ScanPolicy::default(),
        }
    }
}

/// Drives the identity and account lifecycle of one seed and identity index.
///
/// Mutating operations must not run concurrently on the same controller; reads and state
/// observation are always safe.
pub struct VaultController {
    state: StateHandle,
    crypto: Arc<dyn CryptoProvider>,
    connector: Arc<dyn NodeConnector>,
    client: RwLock<Option<Arc<dyn NodeClient>>>,
    http: reqwest::Client,
    polling: RetryPolicy,
    scan: ScanPolicy,
}

impl std::fmt::Debug for VaultController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultController")
            .field("state", &self.state)
            .field("polling", &self.polling)
            .field("scan", &self.scan)
            .finish_non_exhaustive()
    }
}

impl VaultController {
    /// Restores the given state and connects to the node of its network.
    ///
    /// # Errors
    /// - [`VaultKitError::InvalidState`] if the persisted parts of `options` are inconsistent.
    /// - [`VaultKitError::ConnectionError`] if the node cannot be reached.
    pub async fn new(
        options: ControllerOptions,
        crypto: Arc<dyn CryptoProvider>,
        connector: Arc<dyn NodeConnector>,
    ) -> Result<Self, VaultKitError> {
        let ControllerOptions {
            seed,
            network,
            endpoint,
            identity_index,
            issuer,
            identity,
            cred_counter,
            accounts,
            polling,
            scan,
        } = options;

        let state = StateHandle::new(LifecycleState::new(seed, network, identity_index))?;
        let mut restored = StateUpdate::new()
            .issuer(issuer)
            .identity(identity)
            .cred_counter(cred_counter)
            .accounts(accounts);
        if let Some(endpoint) = endpoint {
            restored = restored.endpoint(endpoint);
        }
        let snapshot = state.update(restored)?;

        let client = connect(connector.as_ref(), network, snapshot.endpoint()).await?;
        confirm_consensus(client.as_ref(), network).await?;
        log::info!("connected to {network} node {}", snapshot.endpoint().node_address);

        Ok(Self {
            state,
            crypto,
            connector,
            client: RwLock::new(Some(client)),
            http: reqwest::Client::new(),
            polling,
            scan,
        })
    }

    /// An immutable snapshot of the lifecycle state.
    #[must_use]
    pub fn snapshot(&self) -> LifecycleState {
        self.state.get()
    }

    /// Receives the full state after every committed change, for persistence layers.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Endpoints of the selected network.
    #[must_use]
    pub fn network_config(&self) -> NetworkConfig {
        self.state.get().endpoint().clone()
    }

    /// Switches to `network` and reconnects.
    ///
    /// Pollers started before the switch keep using the previous node until they finish. Every
    /// other call goes to the node of the new network from here on.
    ///
    /// # Errors
    /// Returns [`VaultKitError::ConnectionError`] if the new node is unreachable. The network
    /// is already switched in that case:
    /// - if no client could be opened, node operations fail with `ConnectionError` until a
    ///   later `set_network` succeeds;
    /// - if the client opened but the consensus check failed, the client stays installed and
    ///   connectivity is unconfirmed.
    pub async fn set_network(&self, network: Network) -> Result<(), VaultKitError> {
        let snapshot = self.state.update(StateUpdate::new().network(network))?;
        log::info!("switched to {network}");

        let client = match connect(self.connector.as_ref(), network, snapshot.endpoint()).await {
            Ok(client) => client,
            Err(err) => {
                *self.client.write().unwrap_or_else(PoisonError::into_inner) = None;
                log::warn!("disconnected from {network}: {err}");
                return Err(err);
            }
        };
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some(client.clone());
        confirm_consensus(client.as_ref(), network).await
    }

    /// Parses `network` and switches to it.
    ///
    /// # Errors
    /// Returns [`VaultKitError::InvalidNetwork`] for unknown names, leaving the state untouched.
    /// Otherwise see [`Self::set_network`].
    pub async fn set_network_by_name(&self, network: &str) -> Result<(), VaultKitError> {
        let parsed = Network::from_str(network).map_err(|_| VaultKitError::InvalidNetwork {
            network: network.to_string(),
        })?;
        self.set_network(parsed).await
    }

    /// Configures the identity provider. Identity and accounts are left as they are.
    ///
    /// # Errors
    /// Propagates [`VaultKitError::InvalidState`] from the state handle.
    pub fn set_issuer(&self, issuer: IssuerConfig) -> Result<(), VaultKitError> {
        let ip_identity = issuer.ip_identity();
        self.state.set_issuer(issuer)?;
        log::debug!("identity provider {ip_identity} configured");
        Ok(())
    }

    /// Validates a provider entry from the directory and configures it.
    ///
    /// # Errors
    /// Returns [`VaultKitError::InvalidIssuer`] if any part of the entry is missing or empty.
    pub fn set_identity_provider(&self, provider: IdentityProvider) -> Result<(), VaultKitError> {
        self.set_issuer(IssuerConfig::try_from(provider)?)
    }

    /// Forgets the identity provider and identity object. Accounts and the credential counter
    /// are kept.
    ///
    /// # Errors
    /// Propagates [`VaultKitError::InvalidState`] from the state handle.
    pub fn clear_identity(&self) -> Result<(), VaultKitError> {
        self.state.clear_identity()?;
        log::debug!("identity cleared");
        Ok(())
    }

    /// Stores an identity object obtained outside this controller.
    ///
    /// # Errors
    /// Returns [`VaultKitError::IssuerNotConfigured`] if no provider is configured.
    pub fn initialize_identity(&self, identity: IdentityObject) -> Result<(), VaultKitError> {
        self.state.set_identity(identity)?;
        Ok(())
    }

    /// Lists the identity providers known to the wallet proxy of the selected network.
    ///
    /// # Errors
    /// Returns [`VaultKitError::NetworkError`] or [`VaultKitError::SerializationError`] if the
    /// directory cannot be fetched or decoded.
    pub async fn identity_providers(&self) -> Result<Vec<IdentityProvider>, VaultKitError> {
        let endpoint = self.network_config();
        self.issuer_client(&endpoint)
            .list(&endpoint.wallet_proxy_url)
            .await
    }

    fn client(&self) -> Result<Arc<dyn NodeClient>, VaultKitError> {
        let client = self
            .client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        client.ok_or_else(|| VaultKitError::ConnectionError {
            network: self.state.get().network().to_string(),
            error: "not connected".to_string(),
        })
    }

    fn poller(&self) -> Result<FinalizationPoller, VaultKitError> {
        Ok(FinalizationPoller::new(self.client()?, self.polling))
    }

    fn issuer_client(&self, endpoint: &NetworkConfig) -> IdentityProviderClient {
        IdentityProviderClient::new(Request::new(self.http.clone(), endpoint))
    }
}

async fn cryptographic_parameters(
    client: &dyn NodeClient,
) -> Result<CryptographicParameters, VaultKitError> {
    client
        .cryptographic_parameters()
        .await
        .map_err(VaultKitError::node("cryptographic_parameters"))
}

/// Opens a client for `endpoint`.
async fn connect(
    connector: &dyn NodeConnector,
    network: Network,
    endpoint: &NetworkConfig,
) -> Result<Arc<dyn NodeClient>, VaultKitError> {
    connector
        .connect(endpoint)
        .await
        .map_err(connection_error(network))
}

/// Checks that the node behind `client` answers.
async fn confirm_consensus(client: &dyn NodeClient, network: Network) -> Result<(), VaultKitError> {
    client
        .consensus_status()
        .await
        .map_err(connection_error(network))
}

fn connection_error(network: Network) -> impl Fn(NodeError) -> VaultKitError {
    move |error| VaultKitError::ConnectionError {
        network: network.to_string(),
        error: error.to_string(),
    }
}
