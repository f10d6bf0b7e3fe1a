//! Deterministic collaborators for unit tests.
#![allow(clippy::missing_panics_doc)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use crate::issuers::{IssuerConfig, IssuerInfo, IssuerMetadata};
use crate::{
    AccountAddress, AccountInfo, AccountTransaction, AttributeKind, CcdAmount,
    CredentialDeploymentInput, CredentialPath, CryptoError, CryptoProvider,
    CryptographicParameters, FinalizedOutcome, IdentityPath, IdentityRequest, IdentityRequestInput, IdentitySecretKind, NetworkConfig,
    NodeClient, NodeConnector, NodeError, Nonce, RecoveryRequest, RecoveryRequestInput, Seed,
    Signature, TransactionExpiry, TransactionHash, TransactionStatus, TransactionSummary,
    UnsignedCredentialDeployment,
};

/// A valid base58 address unique to `index`: digits are spelled as letters `a..j`.
pub fn fake_address(index: u32) -> AccountAddress {
    let digits: String = index
        .to_string()
        .chars()
        .map(|d| char::from(b'a' + u8::try_from(d.to_digit(10).unwrap()).unwrap()))
        .collect();
    format!("Acc{digits}").parse().unwrap()
}

/// A provider config rooted at `base_url`, with two revokers.
pub fn issuer_config(ip_identity: u32, base_url: &str) -> IssuerConfig {
    let mut revokers = BTreeMap::new();
    revokers.insert("1".to_string(), json!({ "arIdentity": 1 }));
    revokers.insert("2".to_string(), json!({ "arIdentity": 2 }));
    IssuerConfig::new(
        IssuerInfo {
            ip_identity,
            rest: serde_json::Map::new(),
        },
        IssuerMetadata {
            issuance_start: format!("{base_url}/issue"),
            recovery_start: Some(format!("{base_url}/recover")),
            rest: serde_json::Map::new(),
        },
        revokers,
    )
    .unwrap()
}

/// A successful finalized status.
pub fn finalized() -> TransactionStatus {
    TransactionStatus::Finalized {
        outcome: FinalizedOutcome {
            block_hash: "b1".to_string(),
            summary: Some(TransactionSummary::Success {
                details: json!({}),
            }),
        },
    }
}

/// Crypto provider that derives readable strings from its inputs.
#[derive(Debug, Default)]
pub struct FakeCrypto {
    missing_attribute: Option<AttributeKind>,
    deployment_inputs: Mutex<Vec<(CredentialPath, usize, usize)>>,
}

impl FakeCrypto {
    /// Fails to derive randomness for `attribute`.
    pub fn without_randomness_for(attribute: AttributeKind) -> Self {
        Self {
            missing_attribute: Some(attribute),
            ..Self::default()
        }
    }

    /// `(path, revealed attributes, randomness values)` of every deployment built.
    pub fn deployment_inputs(&self) -> Vec<(CredentialPath, usize, usize)> {
        self.deployment_inputs.lock().unwrap().clone()
    }
}

fn index_of(credential_id: &str) -> Result<u32, CryptoError> {
    credential_id
        .strip_prefix("cred-")
        .and_then(|index| index.parse().ok())
        .ok_or_else(|| CryptoError(format!("malformed credential id {credential_id}")))
}

impl CryptoProvider for FakeCrypto {
    fn identity_secret(
        &self,
        seed: &Seed,
        path: IdentityPath,
        kind: IdentitySecretKind,
    ) -> Result<SecretString, CryptoError> {
        Ok(SecretString::from(format!(
            "{kind}-{}-{}-{}",
            hex::encode(seed.expose()),
            path.issuer,
            path.identity_index
        )))
    }

    fn account_public_key(
        &self,
        _seed: &Seed,
        path: CredentialPath,
    ) -> Result<String, CryptoError> {
        Ok(format!("pk-{}", path.credential_index))
    }

    fn account_signing_key(
        &self,
        _seed: &Seed,
        path: CredentialPath,
    ) -> Result<SecretString, CryptoError> {
        Ok(SecretString::from(format!("sk-{}", path.credential_index)))
    }

    fn attribute_randomness(
        &self,
        _seed: &Seed,
        path: CredentialPath,
        attribute: AttributeKind,
    ) -> Result<Option<SecretString>, CryptoError> {
        if self.missing_attribute == Some(attribute) {
            return Ok(None);
        }
        Ok(Some(SecretString::from(format!(
            "r-{attribute}-{}",
            path.credential_index
        ))))
    }

    fn credential_id(
        &self,
        _seed: &Seed,
        path: CredentialPath,
        _global_context: &CryptographicParameters,
    ) -> Result<String, CryptoError> {
        Ok(format!("cred-{}", path.credential_index))
    }

    fn account_address(&self, credential_id: &str) -> Result<AccountAddress, CryptoError> {
        Ok(fake_address(index_of(credential_id)?))
    }

    fn create_identity_request(
        &self,
        input: &IdentityRequestInput<'_>,
    ) -> Result<IdentityRequest, CryptoError> {
        Ok(IdentityRequest(json!({
            "idCredSec": input.id_cred_sec.expose_secret(),
            "prfKey": input.prf_key.expose_secret(),
            "blinding": input.blinding_randomness.expose_secret(),
            "ipIdentity": input.ip_info.ip_identity,
            "arThreshold": input.ar_threshold,
            "revokers": input.ars_infos.len(),
            "global": input.global_context,
        })))
    }

    fn create_recovery_request(
        &self,
        input: &RecoveryRequestInput<'_>,
    ) -> Result<RecoveryRequest, CryptoError> {
        Ok(RecoveryRequest(json!({
            "idCredSec": input.id_cred_sec.expose_secret(),
            "ipIdentity": input.ip_info.ip_identity,
            "timestamp": input.timestamp,
        })))
    }

    fn create_credential_deployment(
        &self,
        input: &CredentialDeploymentInput<'_>,
        expiry: TransactionExpiry,
    ) -> Result<UnsignedCredentialDeployment, CryptoError> {
        self.deployment_inputs.lock().unwrap().push((
            input.path,
            input.revealed_attributes.len(),
            input.attribute_randomness.len(),
        ));
        Ok(UnsignedCredentialDeployment {
            credential_id: format!("cred-{}", input.path.credential_index),
            expiry,
            body: json!({ "publicKeys": input.public_keys }),
        })
    }

    fn sign_credential_deployment(
        &self,
        _deployment: &UnsignedCredentialDeployment,
        signing_key: &SecretString,
    ) -> Result<Signature, CryptoError> {
        Ok(Signature(signing_key.expose_secret().as_bytes().to_vec()))
    }

    fn serialize_credential_deployment(
        &self,
        deployment: &UnsignedCredentialDeployment,
        _signatures: &[Signature],
    ) -> Result<Vec<u8>, CryptoError> {
        Ok(deployment.credential_id.as_bytes().to_vec())
    }

    fn credential_deployment_hash(
        &self,
        deployment: &UnsignedCredentialDeployment,
        _signatures: &[Signature],
    ) -> Result<TransactionHash, CryptoError> {
        let index = index_of(&deployment.credential_id)?;
        Ok(TransactionHash::new([u8::try_from(index % 256).unwrap(); 32]))
    }

    fn sign_transaction(
        &self,
        transaction: &AccountTransaction,
        signing_key: &SecretString,
    ) -> Result<Signature, CryptoError> {
        Ok(Signature(
            format!("{}:{}", transaction.header.sender, signing_key.expose_secret()).into_bytes(),
        ))
    }
}

#[derive(Debug)]
struct NodeState {
    consensus_ok: bool,
    accept_deployments: bool,
    statuses: VecDeque<Result<TransactionStatus, NodeError>>,
    status_queries: usize,
    accounts: HashMap<AccountAddress, AccountInfo>,
    account_errors: HashMap<AccountAddress, NodeError>,
    account_queries: Vec<AccountAddress>,
    nonces: HashMap<AccountAddress, u64>,
    deployments: Vec<(Vec<u8>, TransactionExpiry)>,
    sent_transactions: Vec<AccountTransaction>,
    parameter_queries: usize,
}

/// In-memory node. Unscripted status queries report a successful finalization.
#[derive(Debug)]
pub struct FakeNode {
    state: Mutex<NodeState>,
}

impl Default for FakeNode {
    fn default() -> Self {
        Self {
            state: Mutex::new(NodeState {
                consensus_ok: true,
                accept_deployments: true,
                statuses: VecDeque::new(),
                status_queries: 0,
                accounts: HashMap::new(),
                account_errors: HashMap::new(),
                account_queries: Vec::new(),
                nonces: HashMap::new(),
                deployments: Vec::new(),
                sent_transactions: Vec::new(),
                parameter_queries: 0,
            }),
        }
    }
}

impl FakeNode {
    fn with_state<R>(&self, f: impl FnOnce(&mut NodeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn script_statuses(&self, statuses: Vec<Result<TransactionStatus, NodeError>>) {
        self.with_state(|s| s.statuses = statuses.into());
    }

    pub fn set_consensus_ok(&self, ok: bool) {
        self.with_state(|s| s.consensus_ok = ok);
    }

    pub fn set_accept_deployments(&self, accept: bool) {
        self.with_state(|s| s.accept_deployments = accept);
    }

    /// Registers the account derived at `index` with `balance` micro-CCD.
    pub fn add_account(&self, index: u32, balance: u64) {
        let address = fake_address(index);
        self.with_state(|s| {
            s.accounts.insert(
                address.clone(),
                AccountInfo {
                    account_address: Some(address),
                    account_available_balance: Some(CcdAmount(balance)),
                },
            );
        });
    }

    pub fn fail_account(&self, index: u32, error: NodeError) {
        self.with_state(|s| s.account_errors.insert(fake_address(index), error));
    }

    pub fn set_nonce(&self, address: &AccountAddress, nonce: u64) {
        self.with_state(|s| s.nonces.insert(address.clone(), nonce));
    }

    pub fn status_queries(&self) -> usize {
        self.with_state(|s| s.status_queries)
    }

    pub fn account_queries(&self) -> Vec<AccountAddress> {
        self.with_state(|s| s.account_queries.clone())
    }

    pub fn deployments(&self) -> Vec<(Vec<u8>, TransactionExpiry)> {
        self.with_state(|s| s.deployments.clone())
    }

    pub fn sent_transactions(&self) -> Vec<AccountTransaction> {
        self.with_state(|s| s.sent_transactions.clone())
    }

    #[allow(dead_code)]
    pub fn parameter_queries(&self) -> usize {
        self.with_state(|s| s.parameter_queries)
    }
}

#[async_trait]
impl NodeClient for FakeNode {
    async fn consensus_status(&self) -> Result<(), NodeError> {
        if self.with_state(|s| s.consensus_ok) {
            Ok(())
        } else {
            Err(NodeError::ConnectionDropped("node unreachable".to_string()))
        }
    }

    async fn cryptographic_parameters(&self) -> Result<CryptographicParameters, NodeError> {
        self.with_state(|s| s.parameter_queries += 1);
        Ok(CryptographicParameters(json!({ "genesisString": "fake" })))
    }

    async fn account_info(&self, address: &AccountAddress) -> Result<AccountInfo, NodeError> {
        self.with_state(|s| {
            s.account_queries.push(address.clone());
            if let Some(error) = s.account_errors.get(address) {
                return Err(error.clone());
            }
            s.accounts.get(address).cloned().ok_or(NodeError::NotFound)
        })
    }

    async fn next_nonce(&self, address: &AccountAddress) -> Result<Nonce, NodeError> {
        self.with_state(|s| Ok(Nonce(s.nonces.get(address).copied().unwrap_or(0))))
    }

    async fn send_credential_deployment(
        &self,
        payload: &[u8],
        expiry: TransactionExpiry,
    ) -> Result<bool, NodeError> {
        self.with_state(|s| {
            if s.accept_deployments {
                s.deployments.push((payload.to_vec(), expiry));
            }
            Ok(s.accept_deployments)
        })
    }

    async fn send_transaction(
        &self,
        transaction: &AccountTransaction,
        _signature: &Signature,
    ) -> Result<TransactionHash, NodeError> {
        self.with_state(|s| {
            s.sent_transactions.push(transaction.clone());
            Ok(TransactionHash::new([0xaa; 32]))
        })
    }

    async fn transaction_status(
        &self,
        _hash: &TransactionHash,
    ) -> Result<TransactionStatus, NodeError> {
        self.with_state(|s| {
            s.status_queries += 1;
            s.statuses.pop_front().unwrap_or_else(|| Ok(finalized()))
        })
    }
}

/// Hands out one [`FakeNode`] per node address, creating them on first use.
#[derive(Debug, Default)]
pub struct FakeConnector {
    nodes: Mutex<HashMap<String, Arc<FakeNode>>>,
    unreachable: Mutex<HashSet<String>>,
    connections: Mutex<Vec<NetworkConfig>>,
}

impl FakeConnector {
    pub fn node(&self, config: &NetworkConfig) -> Arc<FakeNode> {
        self.nodes
            .lock()
            .unwrap()
            .entry(config.node_address.clone())
            .or_default()
            .clone()
    }

    pub fn set_unreachable(&self, config: &NetworkConfig) {
        self.unreachable
            .lock()
            .unwrap()
            .insert(config.node_address.clone());
    }

    pub fn connections(&self) -> Vec<NetworkConfig> {
        self.connections.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeConnector for FakeConnector {
    async fn connect(&self, config: &NetworkConfig) -> Result<Arc<dyn NodeClient>, NodeError> {
        self.connections.lock().unwrap().push(config.clone());
        if self.unreachable.lock().unwrap().contains(&config.node_address) {
            return Err(NodeError::Rpc(format!(
                "connect {}: ECONNREFUSED",
                config.node_address
            )));
        }
        Ok(self.node(config))
    }
}
