//! The lifecycle state of one identity and the handle every component mutates it through.
//!
//! The state lives in a [`tokio::sync::watch`] channel: the channel's lock is the single writer,
//! every committed transition is one atomic replacement, and observers (persistence layers)
//! receive the full snapshot after each one.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::issuers::{IdentityObject, IssuerConfig};
use crate::{error::VaultKitError, AccountAddress, IdentityPath, Network, NetworkConfig, Seed};

/// An account derived from the identity and deployed on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountEntry {
    /// The account's address.
    pub address: AccountAddress,
    /// The credential counter value the account was derived at.
    pub credential_index: u32,
}

/// Snapshot of everything the controller knows about the identity and its accounts.
///
/// Serializing a snapshot never includes the seed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleState {
    network: Network,
    endpoint: NetworkConfig,
    #[serde(skip)]
    seed: Arc<Seed>,
    identity_index: u32,
    issuer: Option<IssuerConfig>,
    identity: Option<IdentityObject>,
    cred_counter: u32,
    accounts: Vec<AccountEntry>,
}

impl LifecycleState {
    /// Builds an initial state. Call [`StateHandle::new`] to validate it.
    #[must_use]
    pub fn new(seed: Seed, network: Network, identity_index: u32) -> Self {
        Self {
            network,
            endpoint: NetworkConfig::for_network(network),
            seed: Arc::new(seed),
            identity_index,
            issuer: None,
            identity: None,
            cred_counter: 0,
            accounts: Vec::new(),
        }
    }

    /// The selected network.
    #[must_use]
    pub const fn network(&self) -> Network {
        self.network
    }

    /// Endpoints of the selected network.
    #[must_use]
    pub const fn endpoint(&self) -> &NetworkConfig {
        &self.endpoint
    }

    pub(crate) fn seed(&self) -> &Seed {
        &self.seed
    }

    /// The identity index within the seed.
    #[must_use]
    pub const fn identity_index(&self) -> u32 {
        self.identity_index
    }

    /// The configured identity provider, if any.
    #[must_use]
    pub const fn issuer(&self) -> Option<&IssuerConfig> {
        self.issuer.as_ref()
    }

    /// The identity object, once issued or recovered.
    #[must_use]
    pub const fn identity(&self) -> Option<&IdentityObject> {
        self.identity.as_ref()
    }

    /// The next unused credential index.
    #[must_use]
    pub const fn cred_counter(&self) -> u32 {
        self.cred_counter
    }

    /// Deployed accounts, in creation order.
    #[must_use]
    pub fn accounts(&self) -> &[AccountEntry] {
        &self.accounts
    }

    /// The HD path of the identity under the configured provider.
    ///
    /// # Errors
    /// Returns [`VaultKitError::IssuerNotConfigured`] without a provider.
    pub fn identity_path(&self) -> Result<IdentityPath, VaultKitError> {
        let issuer = self.issuer().ok_or(VaultKitError::IssuerNotConfigured)?;
        Ok(IdentityPath {
            issuer: issuer.ip_identity(),
            identity_index: self.identity_index,
        })
    }

    fn validate(&self) -> Result<(), VaultKitError> {
        if self.identity.is_some() && self.issuer.is_none() {
            return Err(invalid_state(
                "an identity object requires an identity provider",
            ));
        }

        let mut seen = HashSet::with_capacity(self.accounts.len());
        for account in &self.accounts {
            if !seen.insert(account.credential_index) {
                return Err(invalid_state(&format!(
                    "credential index {} is used by more than one account",
                    account.credential_index
                )));
            }
        }

        if let Some(max) = self.accounts.iter().map(|a| a.credential_index).max() {
            if self.cred_counter < max {
                return Err(invalid_state(&format!(
                    "credential counter {} is below deployed index {max}",
                    self.cred_counter
                )));
            }
        }
        Ok(())
    }
}

fn invalid_state(reason: &str) -> VaultKitError {
    VaultKitError::InvalidState {
        reason: reason.to_string(),
    }
}

/// A partial update, merged into the state in one step. Unset fields are left untouched.
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct StateUpdate {
    network: Option<Network>,
    endpoint: Option<NetworkConfig>,
    issuer: Option<Option<IssuerConfig>>,
    identity: Option<Option<IdentityObject>>,
    cred_counter: Option<u32>,
    accounts: Option<Vec<AccountEntry>>,
}

impl StateUpdate {
    /// An empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects `network` together with its built-in endpoints.
    pub fn network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self.endpoint = Some(NetworkConfig::for_network(network));
        self
    }

    /// Overrides the endpoints of the selected network.
    pub fn endpoint(mut self, endpoint: NetworkConfig) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Sets or clears the identity provider.
    pub fn issuer(mut self, issuer: Option<IssuerConfig>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// Sets or clears the identity object.
    pub fn identity(mut self, identity: Option<IdentityObject>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Overwrites the credential counter.
    pub const fn cred_counter(mut self, cred_counter: u32) -> Self {
        self.cred_counter = Some(cred_counter);
        self
    }

    /// Replaces the account list.
    pub fn accounts(mut self, accounts: Vec<AccountEntry>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    fn apply(self, state: &mut LifecycleState) {
        if let Some(network) = self.network {
            state.network = network;
        }
        if let Some(endpoint) = self.endpoint {
            state.endpoint = endpoint;
        }
        if let Some(issuer) = self.issuer {
            state.issuer = issuer;
        }
        if let Some(identity) = self.identity {
            state.identity = identity;
        }
        if let Some(cred_counter) = self.cred_counter {
            state.cred_counter = cred_counter;
        }
        if let Some(accounts) = self.accounts {
            state.accounts = accounts;
        }
    }
}

/// Shared handle to the lifecycle state. Cloning the handle shares the state.
#[derive(Debug, Clone)]
pub struct StateHandle {
    sender: Arc<watch::Sender<LifecycleState>>,
}

impl StateHandle {
    /// Wraps an initial state after checking its invariants.
    ///
    /// # Errors
    /// Returns [`VaultKitError::InvalidState`] if `initial` breaks an invariant.
    pub fn new(initial: LifecycleState) -> Result<Self, VaultKitError> {
        initial.validate()?;
        let (sender, _) = watch::channel(initial);
        Ok(Self {
            sender: Arc::new(sender),
        })
    }

    /// An immutable snapshot of the current state.
    #[must_use]
    pub fn get(&self) -> LifecycleState {
        self.sender.borrow().clone()
    }

    /// Receives a snapshot after every committed transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.sender.subscribe()
    }

    /// Merges `update` atomically and notifies observers.
    ///
    /// # Errors
    /// Returns [`VaultKitError::InvalidState`] if the merged state would break an invariant;
    /// the state is then left unchanged.
    pub fn update(&self, update: StateUpdate) -> Result<LifecycleState, VaultKitError> {
        self.transition(|state| {
            update.apply(state);
            Ok(())
        })
    }

    /// Applies `change` to a copy of the state and commits it only if `change` succeeds and
    /// the result keeps every invariant.
    pub(crate) fn transition<F>(&self, change: F) -> Result<LifecycleState, VaultKitError>
    where
        F: FnOnce(&mut LifecycleState) -> Result<(), VaultKitError>,
    {
        let mut outcome = Ok(());
        self.sender.send_if_modified(|state| {
            let mut next = state.clone();
            outcome = change(&mut next).and_then(|()| next.validate());
            if outcome.is_ok() {
                *state = next;
            }
            outcome.is_ok()
        });
        outcome.map(|()| self.get())
    }

    /// Configures the identity provider. Identity and accounts are left as they are.
    ///
    /// # Errors
    /// Propagates [`VaultKitError::InvalidState`] from [`Self::update`].
    pub fn set_issuer(&self, issuer: IssuerConfig) -> Result<LifecycleState, VaultKitError> {
        self.update(StateUpdate::new().issuer(Some(issuer)))
    }

    /// Stores an identity object. A provider must already be configured.
    ///
    /// # Errors
    /// Returns [`VaultKitError::IssuerNotConfigured`] without a provider.
    pub fn set_identity(&self, identity: IdentityObject) -> Result<LifecycleState, VaultKitError> {
        self.transition(|state| {
            if state.issuer.is_none() {
                return Err(VaultKitError::IssuerNotConfigured);
            }
            state.identity = Some(identity);
            Ok(())
        })
    }

    /// Forgets the identity provider and identity object. Accounts and the credential counter
    /// are kept.
    ///
    /// # Errors
    /// Propagates [`VaultKitError::InvalidState`] from [`Self::update`].
    pub fn clear_identity(&self) -> Result<LifecycleState, VaultKitError> {
        self.update(StateUpdate::new().issuer(None).identity(None))
    }

    /// Appends a freshly deployed account and advances the counter past it, in one step.
    ///
    /// Fails if the counter moved since the account's index was read, so an index is never
    /// claimed twice.
    pub(crate) fn record_account(
        &self,
        account: AccountEntry,
    ) -> Result<LifecycleState, VaultKitError> {
        self.transition(|state| {
            if state.cred_counter != account.credential_index {
                return Err(invalid_state(&format!(
                    "credential counter moved to {} while deploying index {}",
                    state.cred_counter, account.credential_index
                )));
            }
            state.cred_counter += 1;
            state.accounts.push(account);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{fake_address, issuer_config};

    fn handle() -> StateHandle {
        StateHandle::new(LifecycleState::new(
            Seed::new(vec![7; 32]),
            Network::Testnet,
            0,
        ))
        .unwrap()
    }

    fn account(index: u32) -> AccountEntry {
        AccountEntry {
            address: fake_address(index),
            credential_index: index,
        }
    }

    #[test]
    fn test_initial_state() {
        let state = handle().get();
        assert_eq!(state.network(), Network::Testnet);
        assert_eq!(state.endpoint(), &NetworkConfig::for_network(Network::Testnet));
        assert_eq!(state.cred_counter(), 0);
        assert!(state.accounts().is_empty());
        assert!(state.issuer().is_none());
    }

    #[test]
    fn test_update_merges_only_set_fields() {
        let handle = handle();
        handle
            .update(StateUpdate::new().accounts(vec![account(0)]).cred_counter(1))
            .unwrap();
        let state = handle.update(StateUpdate::new().network(Network::Mainnet)).unwrap();

        assert_eq!(state.network(), Network::Mainnet);
        assert_eq!(state.endpoint().node_port, 20001);
        assert_eq!(state.accounts(), &[account(0)]);
        assert_eq!(state.cred_counter(), 1);
    }

    #[test]
    fn test_identity_requires_issuer() {
        let handle = handle();
        let err = handle
            .set_identity(IdentityObject(serde_json::json!({})))
            .unwrap_err();
        assert!(matches!(err, VaultKitError::IssuerNotConfigured));

        let err = handle
            .update(StateUpdate::new().identity(Some(IdentityObject(serde_json::json!({})))))
            .unwrap_err();
        assert!(matches!(err, VaultKitError::InvalidState { .. }));
        assert!(handle.get().identity().is_none());
    }

    #[test]
    fn test_counter_may_not_fall_below_deployed_index() {
        let handle = handle();
        let err = handle
            .update(StateUpdate::new().accounts(vec![account(0), account(4)]).cred_counter(2))
            .unwrap_err();
        assert!(matches!(err, VaultKitError::InvalidState { .. }));
        assert!(handle.get().accounts().is_empty());
    }

    #[test]
    fn test_duplicate_indices_are_rejected() {
        let handle = handle();
        let err = handle
            .update(StateUpdate::new().accounts(vec![account(1), account(1)]).cred_counter(2))
            .unwrap_err();
        assert!(matches!(err, VaultKitError::InvalidState { .. }));
    }

    #[test]
    fn test_clear_identity_keeps_accounts() {
        let handle = handle();
        handle.set_issuer(issuer_config(1, "https://id.example.com")).unwrap();
        handle
            .set_identity(IdentityObject(serde_json::json!({ "v": 0 })))
            .unwrap();
        handle.record_account(account(0)).unwrap();

        let state = handle.clear_identity().unwrap();

        assert!(state.issuer().is_none());
        assert!(state.identity().is_none());
        assert_eq!(state.accounts(), &[account(0)]);
        assert_eq!(state.cred_counter(), 1);
    }

    #[test]
    fn test_set_issuer_keeps_identity() {
        let handle = handle();
        handle.set_issuer(issuer_config(1, "https://a.example.com")).unwrap();
        handle
            .set_identity(IdentityObject(serde_json::json!({ "v": 0 })))
            .unwrap();

        let state = handle.set_issuer(issuer_config(2, "https://b.example.com")).unwrap();

        assert_eq!(state.issuer().unwrap().ip_identity(), 2);
        assert!(state.identity().is_some());
    }

    #[test]
    fn test_record_account_advances_counter() {
        let handle = handle();
        handle.record_account(account(0)).unwrap();
        let state = handle.record_account(account(1)).unwrap();
        assert_eq!(state.cred_counter(), 2);
        assert_eq!(state.accounts(), &[account(0), account(1)]);

        let err = handle.record_account(account(1)).unwrap_err();
        assert!(matches!(err, VaultKitError::InvalidState { .. }));
        assert_eq!(handle.get().cred_counter(), 2);
    }

    #[tokio::test]
    async fn test_observers_see_each_commit() {
        let handle = handle();
        let mut updates = handle.subscribe();

        handle.update(StateUpdate::new().network(Network::Mainnet)).unwrap();
        updates.changed().await.unwrap();
        assert_eq!(updates.borrow_and_update().network(), Network::Mainnet);

        let _ = handle.update(StateUpdate::new().cred_counter(0).accounts(vec![account(3)]));
        assert!(!updates.has_changed().unwrap());
    }

    #[test]
    fn test_snapshot_never_serializes_seed() {
        let json = serde_json::to_value(handle().get()).unwrap();
        assert!(json.get("seed").is_none());
        assert_eq!(json["network"], "Testnet");
        assert_eq!(json["credCounter"], 0);
        assert_eq!(json["accounts"], serde_json::json!([]));
    }
}
