//! Chain access: the node client contract and the values that cross it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{error::VaultKitError, NetworkConfig};

/// Messages that identify a dropped or reset connection.
const TRANSIENT_MARKERS: [&str; 2] = ["Connection dropped", "ECONNRESET"];

/// Messages that identify a missing account. The second form is how the gRPC-web transport
/// percent-encodes the node's status message.
const NOT_FOUND_MARKERS: [&str; 2] = [
    "account or block not found",
    "account%20or%20block%20not%20found.",
];

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Failure reported by a [`NodeClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// The queried account or block does not exist.
    #[error("account or block not found")]
    NotFound,
    /// The connection to the node was dropped or reset.
    #[error("Connection dropped: {0}")]
    ConnectionDropped(String),
    /// Any other RPC failure.
    #[error("{0}")]
    Rpc(String),
}

impl NodeError {
    /// Whether the failure is a dropped/reset connection worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionDropped(_) => true,
            Self::NotFound => false,
            Self::Rpc(message) => TRANSIENT_MARKERS.iter().any(|m| message.contains(m)),
        }
    }

    /// Whether the failure says the queried account does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound => true,
            Self::ConnectionDropped(_) => false,
            Self::Rpc(message) => NOT_FOUND_MARKERS.iter().any(|m| message.contains(m)),
        }
    }
}

/// A base58check account address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountAddress(String);

impl AccountAddress {
    /// The base58 text of the address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AccountAddress {
    type Err = VaultKitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.chars().all(|c| BASE58_ALPHABET.contains(c)) {
            return Err(VaultKitError::InvalidInput {
                attribute: "address".to_string(),
                reason: format!("`{s}` is not a base58 account address"),
            });
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for AccountAddress {
    type Error = VaultKitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountAddress> for String {
    fn from(value: AccountAddress) -> Self {
        value.0
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A 32 byte transaction hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionHash([u8; 32]);

impl TransactionHash {
    /// Wraps raw hash bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw hash bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for TransactionHash {
    type Err = VaultKitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| VaultKitError::InvalidInput {
            attribute: "transaction_hash".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for TransactionHash {
    type Error = VaultKitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TransactionHash> for String {
    fn from(value: TransactionHash) -> Self {
        hex::encode(value.0)
    }
}

impl fmt::Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Transaction expiry as seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionExpiry(pub u64);

impl TransactionExpiry {
    /// An expiry `lifetime` from now.
    ///
    /// # Errors
    /// Returns an error if the system clock is before the Unix epoch.
    pub fn from_now(lifetime: Duration) -> Result<Self, VaultKitError> {
        Ok(Self(unix_now()?.saturating_add(lifetime.as_secs())))
    }
}

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> Result<u64, VaultKitError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| VaultKitError::InvalidState {
            reason: format!("Critical. Unable to determine SystemTime: {e}"),
        })
}

/// Next sequence number of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(pub u64);

/// An amount of CCD in micro-CCD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CcdAmount(pub u64);

impl CcdAmount {
    const MICRO_PER_CCD: u64 = 1_000_000;

    /// Converts whole CCD into micro-CCD; `None` on overflow.
    #[must_use]
    pub const fn from_ccd(ccd: u64) -> Option<Self> {
        match ccd.checked_mul(Self::MICRO_PER_CCD) {
            Some(micro) => Some(Self(micro)),
            None => None,
        }
    }

    /// The amount in micro-CCD.
    #[must_use]
    pub const fn micro_ccd(self) -> u64 {
        self.0
    }
}

/// An opaque signature produced by the crypto provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(pub Vec<u8>);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0))
    }
}

/// Chain-wide cryptographic parameters, passed through to the crypto provider untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CryptographicParameters(pub serde_json::Value);

/// Header shared by account transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionHeader {
    /// Sending account.
    pub sender: AccountAddress,
    /// Sender's next nonce.
    pub nonce: Nonce,
    /// Expiry of the transaction.
    pub expiry: TransactionExpiry,
}

/// Payload of an account transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransactionPayload {
    /// A simple CCD transfer.
    #[serde(rename_all = "camelCase")]
    Transfer {
        /// Amount to transfer.
        amount: CcdAmount,
        /// Receiving account.
        to_address: AccountAddress,
    },
}

/// An account transaction ready to be signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTransaction {
    /// Sender, nonce and expiry.
    pub header: TransactionHeader,
    /// What the transaction does.
    pub payload: TransactionPayload,
}

/// Account information as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    /// The account's address.
    pub account_address: Option<AccountAddress>,
    /// Balance available for transfers.
    pub account_available_balance: Option<CcdAmount>,
}

/// Summary of a finalized block item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transactionType", rename_all = "camelCase")]
pub enum TransactionSummary {
    /// The transaction took effect.
    Success {
        /// Kind-specific details.
        details: serde_json::Value,
    },
    /// The transaction landed on-chain but was rejected.
    #[serde(rename_all = "camelCase")]
    Failed {
        /// Why it was rejected.
        reject_reason: String,
    },
}

/// The outcome of a finalized block item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedOutcome {
    /// The block the item was finalized in.
    pub block_hash: String,
    /// The item's summary, when the node reports one.
    pub summary: Option<TransactionSummary>,
}

/// Status of a submitted block item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TransactionStatus {
    /// Received or committed, not yet final.
    Pending,
    /// Final on-chain.
    Finalized {
        /// Where and how it was finalized.
        outcome: FinalizedOutcome,
    },
}

/// Request/response access to a node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Queries consensus status. Used as a connectivity check.
    async fn consensus_status(&self) -> Result<(), NodeError>;

    /// Fetches chain-wide cryptographic parameters.
    async fn cryptographic_parameters(&self) -> Result<CryptographicParameters, NodeError>;

    /// Fetches account information, [`NodeError::NotFound`] for unknown accounts.
    async fn account_info(&self, address: &AccountAddress) -> Result<AccountInfo, NodeError>;

    /// Fetches the next nonce of an account.
    async fn next_nonce(&self, address: &AccountAddress) -> Result<Nonce, NodeError>;

    /// Submits a serialized credential deployment. `false` means the node refused it.
    async fn send_credential_deployment(
        &self,
        payload: &[u8],
        expiry: TransactionExpiry,
    ) -> Result<bool, NodeError>;

    /// Submits a signed account transaction.
    async fn send_transaction(
        &self,
        transaction: &AccountTransaction,
        signature: &Signature,
    ) -> Result<TransactionHash, NodeError>;

    /// Queries the status of a submitted block item.
    async fn transaction_status(
        &self,
        hash: &TransactionHash,
    ) -> Result<TransactionStatus, NodeError>;
}

/// Opens node clients for a network configuration.
#[async_trait]
pub trait NodeConnector: Send + Sync {
    /// Builds a client for `config`. Connectivity is checked separately by the caller.
    async fn connect(&self, config: &NetworkConfig) -> Result<Arc<dyn NodeClient>, NodeError>;
}
