use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::VaultKitError;

/// Public description of an identity provider. Only `ipIdentity` is interpreted here; every
/// other field is kept verbatim for the crypto provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerInfo {
    /// The provider's on-chain identity, which roots its subtree of the HD wallet.
    pub ip_identity: u32,
    /// Remaining fields (description, verification keys).
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

/// Endpoints and presentation data of an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerMetadata {
    /// Where issuance requests are sent.
    #[serde(default)]
    pub issuance_start: String,
    /// Where recovery requests are sent, if the provider supports recovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_start: Option<String>,
    /// Remaining fields (icon, support contact, display name).
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

/// An identity provider entry as listed by the wallet proxy. Any part may be missing; use
/// [`IssuerConfig::try_from`] to get a validated configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProvider {
    /// Provider description.
    #[serde(default)]
    pub ip_info: Option<IssuerInfo>,
    /// Anonymity revokers trusted by the provider, keyed by revoker identity.
    #[serde(default)]
    pub ars_infos: Option<BTreeMap<String, serde_json::Value>>,
    /// Provider endpoints.
    #[serde(default)]
    pub metadata: Option<IssuerMetadata>,
}

/// A complete identity provider configuration. Info, metadata and anonymity revokers are always
/// present together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IdentityProvider", into = "IdentityProvider")]
pub struct IssuerConfig {
    info: IssuerInfo,
    metadata: IssuerMetadata,
    anonymity_revokers: BTreeMap<String, serde_json::Value>,
}

impl IssuerConfig {
    /// Validates and bundles the three parts of a provider configuration.
    ///
    /// # Errors
    /// Returns [`VaultKitError::InvalidIssuer`] if the metadata has no issuance endpoint or no
    /// anonymity revoker is listed.
    pub fn new(
        info: IssuerInfo,
        metadata: IssuerMetadata,
        anonymity_revokers: BTreeMap<String, serde_json::Value>,
    ) -> Result<Self, VaultKitError> {
        if metadata.issuance_start.trim().is_empty() {
            return Err(invalid("metadata has no issuanceStart"));
        }
        if anonymity_revokers.is_empty() {
            return Err(invalid("no anonymity revokers listed"));
        }
        Ok(Self {
            info,
            metadata,
            anonymity_revokers,
        })
    }

    /// Provider description.
    #[must_use]
    pub const fn info(&self) -> &IssuerInfo {
        &self.info
    }

    /// Provider endpoints.
    #[must_use]
    pub const fn metadata(&self) -> &IssuerMetadata {
        &self.metadata
    }

    /// Anonymity revokers, keyed by revoker identity.
    #[must_use]
    pub const fn anonymity_revokers(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.anonymity_revokers
    }

    /// The provider's `ipIdentity`.
    #[must_use]
    pub const fn ip_identity(&self) -> u32 {
        self.info.ip_identity
    }

    /// Revokers needed to de-anonymize an identity issued under this configuration.
    #[must_use]
    pub fn ar_threshold(&self) -> u8 {
        ar_threshold(self.anonymity_revokers.len())
    }
}

impl TryFrom<IdentityProvider> for IssuerConfig {
    type Error = VaultKitError;

    fn try_from(value: IdentityProvider) -> Result<Self, Self::Error> {
        let info = value.ip_info.ok_or_else(|| invalid("missing ipInfo"))?;
        let metadata = value.metadata.ok_or_else(|| invalid("missing metadata"))?;
        let anonymity_revokers = value.ars_infos.ok_or_else(|| invalid("missing arsInfos"))?;
        Self::new(info, metadata, anonymity_revokers)
    }
}

impl From<IssuerConfig> for IdentityProvider {
    fn from(value: IssuerConfig) -> Self {
        Self {
            ip_info: Some(value.info),
            ars_infos: Some(value.anonymity_revokers),
            metadata: Some(value.metadata),
        }
    }
}

fn invalid(reason: &str) -> VaultKitError {
    VaultKitError::InvalidIssuer {
        reason: reason.to_string(),
    }
}

/// `min(revokers - 1, 255)`: all but one revoker must cooperate.
#[must_use]
pub fn ar_threshold(revokers: usize) -> u8 {
    u8::try_from(revokers.saturating_sub(1)).unwrap_or(u8::MAX)
}

/// The identity artifact granted by an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityObject(pub serde_json::Value);

impl IdentityObject {
    /// The unversioned identity object. Providers wrap it as `{"v": .., "value": ..}`.
    #[must_use]
    pub fn value(&self) -> &serde_json::Value {
        self.0.get("value").unwrap_or(&self.0)
    }
}
