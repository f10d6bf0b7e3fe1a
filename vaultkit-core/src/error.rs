use thiserror::Error;

use crate::{CryptoError, NodeError};

/// Error outputs from `VaultKit`
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum VaultKitError {
    /// The requested network is not one of the known networks
    #[error("invalid_network: {network}")]
    InvalidNetwork {
        /// The rejected network name.
        network: String,
    },
    /// The identity provider configuration is partial or empty
    #[error("invalid_issuer: {reason}")]
    InvalidIssuer {
        /// What is missing from the configuration.
        reason: String,
    },
    /// The node for the selected network could not be reached, or no node is connected after a
    /// failed switch. The network field in state is already updated when this is returned from
    /// `set_network`.
    #[error("connection_error: {network}: {error}")]
    ConnectionError {
        /// The network whose node was being connected.
        network: String,
        /// The underlying connection failure.
        error: String,
    },
    /// The operation needs an identity provider to be configured first
    #[error("issuer_not_configured")]
    IssuerNotConfigured,
    /// The operation needs an identity object to be initialized first
    #[error("identity_not_initialized")]
    IdentityNotInitialized,
    /// The identity provider did not redirect the issuance request
    #[error("issuer_rejected: {detail}")]
    IssuerRejected {
        /// The body the provider answered with.
        detail: String,
    },
    /// The URL returned at the end of issuance does not carry a `code_uri` fragment
    #[error("malformed_return_url: {url}")]
    MalformedReturnUrl {
        /// The URL as received.
        url: String,
    },
    /// The identity provider reported a failed issuance
    #[error("issuer_error: {detail}")]
    IssuerError {
        /// The detail reported by the provider.
        detail: String,
    },
    /// The identity is still being issued; retry later
    #[error("issuance_pending")]
    IssuancePending,
    /// The identity provider answered with a status this crate does not know
    #[error("unexpected_issuer_status: {status}")]
    UnexpectedIssuerStatus {
        /// The status as received.
        status: String,
    },
    /// No candidate identity provider could recover the identity
    #[error("recovery_exhausted: {attempts} identity providers tried")]
    RecoveryExhausted {
        /// Number of providers that were tried.
        attempts: usize,
    },
    /// A defined attribute has no commitment randomness at the current credential index
    #[error("derivation_incomplete: missing randomness for attribute {attribute}")]
    DerivationIncomplete {
        /// The attribute lacking randomness.
        attribute: String,
    },
    /// The node refused the credential deployment
    #[error("deployment_rejected")]
    DeploymentRejected,
    /// The transaction was finalized but did not succeed
    #[error("transaction_failed: {summary}")]
    TransactionFailed {
        /// The reject reason from the finalized outcome.
        summary: String,
    },
    /// Polling the transaction status failed with a non-transient error
    #[error("polling_error: {error}")]
    PollingError {
        /// The underlying error message.
        error: String,
    },
    /// The account is not known locally or on-chain
    #[error("account_not_found: {address}")]
    AccountNotFound {
        /// The address that was looked up.
        address: String,
    },
    /// The requested state transition would break a lifecycle invariant
    #[error("invalid_state: {reason}")]
    InvalidState {
        /// The violated invariant.
        reason: String,
    },
    /// The presented input is not valid for the requested operation
    #[error("invalid_input: {attribute}: {reason}")]
    InvalidInput {
        /// The offending input.
        attribute: String,
        /// Why it was rejected.
        reason: String,
    },
    /// HTTP request to an identity provider or the wallet proxy failed
    #[error("network_error: {url} (status {status:?}): {error}")]
    NetworkError {
        /// The requested URL.
        url: String,
        /// The HTTP status, if a response was received.
        status: Option<u16>,
        /// Error details.
        error: String,
    },
    /// Unexpected error serializing or deserializing information
    #[error("serialization_error: {error}")]
    SerializationError {
        /// Error details.
        error: String,
    },
    /// The crypto provider failed to derive or build a value
    #[error("crypto_error: {error}")]
    Crypto {
        /// Error details.
        error: String,
    },
    /// A node request outside the finalization poller failed
    #[error("node_error: {operation}: {source}")]
    Node {
        /// The node operation being performed.
        operation: String,
        /// The node failure.
        source: NodeError,
    },
}

impl VaultKitError {
    pub(crate) fn node(operation: &str) -> impl FnOnce(NodeError) -> Self + '_ {
        move |source| Self::Node {
            operation: operation.to_string(),
            source,
        }
    }
}

impl From<CryptoError> for VaultKitError {
    fn from(value: CryptoError) -> Self {
        Self::Crypto { error: value.0 }
    }
}

impl From<serde_json::Error> for VaultKitError {
    fn from(value: serde_json::Error) -> Self {
        Self::SerializationError {
            error: value.to_string(),
        }
    }
}
