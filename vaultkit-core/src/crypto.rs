//! The contract with the host's cryptographic collaborator.
//!
//! Key derivation, identity requests and credential deployments are built by the host (typically
//! on top of the Concordium SDK). This crate only sequences them, so everything here is either an
//! input handed to the provider or an opaque value handed back.

use std::collections::BTreeMap;
use std::fmt;

use secrecy::{ExposeSecret, SecretSlice, SecretString};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use thiserror::Error;

use crate::issuers::{IdentityObject, IssuerConfig, IssuerInfo};
use crate::{
    AccountAddress, AccountTransaction, CryptographicParameters, Signature, TransactionExpiry,
    TransactionHash,
};

/// The wallet seed every key is derived from. Never logged, never serialized.
pub struct Seed(SecretSlice<u8>);

impl Seed {
    /// Wraps raw seed bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(SecretSlice::from(bytes))
    }

    /// Parses a hex encoded seed.
    ///
    /// # Errors
    /// Returns [`CryptoError`] if `seed_hex` is not valid hex.
    pub fn from_hex(seed_hex: &str) -> Result<Self, CryptoError> {
        hex::decode(seed_hex)
            .map(Self::new)
            .map_err(|e| CryptoError(format!("seed is not valid hex: {e}")))
    }

    /// Exposes the seed bytes to a derivation routine.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Seed([REDACTED])")
    }
}

/// Failure reported by the [`CryptoProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CryptoError(pub String);

/// Locates an identity in the HD tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityPath {
    /// The `ipIdentity` of the identity provider.
    pub issuer: u32,
    /// The identity index within the seed.
    pub identity_index: u32,
}

/// Locates a credential (account) below an identity in the HD tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialPath {
    /// The `ipIdentity` of the identity provider.
    pub issuer: u32,
    /// The identity index within the seed.
    pub identity_index: u32,
    /// The credential counter value the account is derived at.
    pub credential_index: u32,
}

impl IdentityPath {
    /// Descends to the credential at `credential_index`.
    #[must_use]
    pub const fn credential(self, credential_index: u32) -> CredentialPath {
        CredentialPath {
            issuer: self.issuer,
            identity_index: self.identity_index,
            credential_index,
        }
    }
}

/// The issuer-facing secrets of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum IdentitySecretKind {
    /// The identity credential secret (`idCredSec`).
    IdCredSec,
    /// The PRF key.
    PrfKey,
    /// The randomness blinding the provider's signature.
    SignatureBlindingRandomness,
}

/// The attributes defined by the identity protocol. Every credential carries a commitment to
/// each of them, so randomness must be derivable for all.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, Serialize,
    Deserialize,
)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum AttributeKind {
    /// First name.
    FirstName,
    /// Last name.
    LastName,
    /// Sex, as an ISO/IEC 5218 code.
    Sex,
    /// Date of birth.
    Dob,
    /// Country of residence.
    CountryOfResidence,
    /// Country of nationality.
    Nationality,
    /// Type of the identity document.
    IdDocType,
    /// Number of the identity document.
    IdDocNo,
    /// Issuer of the identity document.
    IdDocIssuer,
    /// Issue date of the identity document.
    IdDocIssuedAt,
    /// Expiry date of the identity document.
    IdDocExpiresAt,
    /// National ID number.
    NationalIdNo,
    /// Tax ID number.
    TaxIdNo,
    /// Legal entity identifier.
    Lei,
    /// Legal name of a company.
    LegalName,
    /// Country of incorporation.
    LegalCountry,
    /// Business registration number.
    BusinessNumber,
    /// Authority that registered the company.
    RegistrationAuth,
}

/// Inputs for an identity issuance request.
#[derive(Debug)]
pub struct IdentityRequestInput<'a> {
    /// Provider description.
    pub ip_info: &'a IssuerInfo,
    /// Anonymity revokers, keyed by their identity.
    pub ars_infos: &'a BTreeMap<String, serde_json::Value>,
    /// Number of anonymity revokers needed to de-anonymize.
    pub ar_threshold: u8,
    /// Chain-wide cryptographic parameters.
    pub global_context: &'a CryptographicParameters,
    /// Identity credential secret.
    pub id_cred_sec: &'a SecretString,
    /// PRF key.
    pub prf_key: &'a SecretString,
    /// Signature blinding randomness.
    pub blinding_randomness: &'a SecretString,
}

/// Inputs for an identity recovery request.
#[derive(Debug)]
pub struct RecoveryRequestInput<'a> {
    /// Identity credential secret.
    pub id_cred_sec: &'a SecretString,
    /// Provider description.
    pub ip_info: &'a IssuerInfo,
    /// Chain-wide cryptographic parameters.
    pub global_context: &'a CryptographicParameters,
    /// Unix time in seconds at which the request is built.
    pub timestamp: u64,
}

/// One verification key of a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyKey {
    /// Signature scheme, `Ed25519` for derived accounts.
    pub scheme_id: String,
    /// Hex encoded public key.
    pub verify_key: String,
}

/// The public keys a credential is deployed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPublicKeys {
    /// Keys by key index.
    pub keys: BTreeMap<u8, VerifyKey>,
    /// Signatures required to sign for the credential.
    pub threshold: u8,
}

impl CredentialPublicKeys {
    /// A single Ed25519 key with threshold one, the shape of every derived account.
    #[must_use]
    pub fn single_ed25519(public_key: String) -> Self {
        let mut keys = BTreeMap::new();
        keys.insert(
            0,
            VerifyKey {
                scheme_id: "Ed25519".to_string(),
                verify_key: public_key,
            },
        );
        Self { keys, threshold: 1 }
    }
}

/// Inputs for building a credential deployment.
#[derive(Debug)]
pub struct CredentialDeploymentInput<'a> {
    /// The configured identity provider.
    pub issuer: &'a IssuerConfig,
    /// Chain-wide cryptographic parameters.
    pub global_context: &'a CryptographicParameters,
    /// The identity backing the credential.
    pub identity_object: &'a IdentityObject,
    /// Attributes disclosed on-chain.
    pub revealed_attributes: Vec<AttributeKind>,
    /// The wallet seed.
    pub seed: &'a Seed,
    /// Where the credential sits in the HD tree.
    pub path: CredentialPath,
    /// Keys the account is deployed with.
    pub public_keys: CredentialPublicKeys,
    /// Commitment randomness for every defined attribute.
    pub attribute_randomness: BTreeMap<AttributeKind, SecretString>,
}

/// An unsigned credential deployment as built by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedCredentialDeployment {
    /// The credential id, which determines the account address.
    pub credential_id: String,
    /// Expiry the deployment was built with.
    pub expiry: TransactionExpiry,
    /// The provider-specific body.
    pub body: serde_json::Value,
}

/// Opaque identity issuance request, sent to the provider inside the `state` parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityRequest(pub serde_json::Value);

/// Opaque identity recovery request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecoveryRequest(pub serde_json::Value);

/// Deterministic derivation and proof construction provided by the host.
///
/// Implementations must be pure: identical inputs yield identical outputs.
pub trait CryptoProvider: Send + Sync {
    /// Derives one of the issuer-facing identity secrets.
    ///
    /// # Errors
    /// Returns [`CryptoError`] if derivation fails.
    fn identity_secret(
        &self,
        seed: &Seed,
        path: IdentityPath,
        kind: IdentitySecretKind,
    ) -> Result<SecretString, CryptoError>;

    /// Derives the hex encoded public key of the account at `path`.
    ///
    /// # Errors
    /// Returns [`CryptoError`] if derivation fails.
    fn account_public_key(&self, seed: &Seed, path: CredentialPath)
        -> Result<String, CryptoError>;

    /// Derives the signing key of the account at `path`.
    ///
    /// # Errors
    /// Returns [`CryptoError`] if derivation fails.
    fn account_signing_key(
        &self,
        seed: &Seed,
        path: CredentialPath,
    ) -> Result<SecretString, CryptoError>;

    /// Derives the commitment randomness for `attribute`; `None` if none can be derived.
    ///
    /// # Errors
    /// Returns [`CryptoError`] if derivation fails.
    fn attribute_randomness(
        &self,
        seed: &Seed,
        path: CredentialPath,
        attribute: AttributeKind,
    ) -> Result<Option<SecretString>, CryptoError>;

    /// Derives the credential id deployed at `path`.
    ///
    /// # Errors
    /// Returns [`CryptoError`] if derivation fails.
    fn credential_id(
        &self,
        seed: &Seed,
        path: CredentialPath,
        global_context: &CryptographicParameters,
    ) -> Result<String, CryptoError>;

    /// Computes the account address owned by a credential id.
    ///
    /// # Errors
    /// Returns [`CryptoError`] if the credential id is malformed.
    fn account_address(&self, credential_id: &str) -> Result<AccountAddress, CryptoError>;

    /// Builds an identity issuance request.
    ///
    /// # Errors
    /// Returns [`CryptoError`] if the request cannot be built.
    fn create_identity_request(
        &self,
        input: &IdentityRequestInput<'_>,
    ) -> Result<IdentityRequest, CryptoError>;

    /// Builds an identity recovery request.
    ///
    /// # Errors
    /// Returns [`CryptoError`] if the request cannot be built.
    fn create_recovery_request(
        &self,
        input: &RecoveryRequestInput<'_>,
    ) -> Result<RecoveryRequest, CryptoError>;

    /// Builds an unsigned credential deployment.
    ///
    /// # Errors
    /// Returns [`CryptoError`] if the deployment cannot be built.
    fn create_credential_deployment(
        &self,
        input: &CredentialDeploymentInput<'_>,
        expiry: TransactionExpiry,
    ) -> Result<UnsignedCredentialDeployment, CryptoError>;

    /// Signs a credential deployment with an account signing key.
    ///
    /// # Errors
    /// Returns [`CryptoError`] if signing fails.
    fn sign_credential_deployment(
        &self,
        deployment: &UnsignedCredentialDeployment,
        signing_key: &SecretString,
    ) -> Result<Signature, CryptoError>;

    /// Serializes a signed credential deployment into the wire payload.
    ///
    /// # Errors
    /// Returns [`CryptoError`] if serialization fails.
    fn serialize_credential_deployment(
        &self,
        deployment: &UnsignedCredentialDeployment,
        signatures: &[Signature],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Computes the transaction hash of a signed credential deployment.
    ///
    /// # Errors
    /// Returns [`CryptoError`] if hashing fails.
    fn credential_deployment_hash(
        &self,
        deployment: &UnsignedCredentialDeployment,
        signatures: &[Signature],
    ) -> Result<TransactionHash, CryptoError>;

    /// Signs an account transaction.
    ///
    /// # Errors
    /// Returns [`CryptoError`] if signing fails.
    fn sign_transaction(
        &self,
        transaction: &AccountTransaction,
        signing_key: &SecretString,
    ) -> Result<Signature, CryptoError>;
}
