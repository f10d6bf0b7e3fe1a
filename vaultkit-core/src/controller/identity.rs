use crate::issuers::{IdentityObject, IssuerConfig};
use crate::node::unix_now;
use crate::{
    error::VaultKitError, first_success, BestEffort, IdentityPath, IdentityRequest,
    IdentityRequestInput, IdentitySecretKind, LifecycleState, RecoveryRequestInput, StateUpdate,
};

use super::{cryptographic_parameters, VaultController};

impl VaultController {
    /// Builds an identity issuance request for the configured provider.
    ///
    /// # Errors
    /// - [`VaultKitError::IssuerNotConfigured`] without a provider.
    /// - [`VaultKitError::Crypto`] or [`VaultKitError::Node`] if a collaborator fails.
    pub async fn build_issuance_request(&self) -> Result<IdentityRequest, VaultKitError> {
        let snapshot = self.state.get();
        let issuer = snapshot.issuer().ok_or(VaultKitError::IssuerNotConfigured)?;
        let path = snapshot.identity_path()?;
        let seed = snapshot.seed();

        let id_cred_sec =
            self.crypto
                .identity_secret(seed, path, IdentitySecretKind::IdCredSec)?;
        let prf_key = self
            .crypto
            .identity_secret(seed, path, IdentitySecretKind::PrfKey)?;
        let blinding_randomness = self.crypto.identity_secret(
            seed,
            path,
            IdentitySecretKind::SignatureBlindingRandomness,
        )?;

        let global_context = cryptographic_parameters(self.client()?.as_ref()).await?;

        let request = self.crypto.create_identity_request(&IdentityRequestInput {
            ip_info: issuer.info(),
            ars_infos: issuer.anonymity_revokers(),
            ar_threshold: issuer.ar_threshold(),
            global_context: &global_context,
            id_cred_sec: &id_cred_sec,
            prf_key: &prf_key,
            blinding_randomness: &blinding_randomness,
        })?;
        Ok(request)
    }

    /// Sends `request` to the provider's issuance endpoint and returns the URL of the
    /// verification flow it redirected to. The provider redirects to `redirect_uri` once the
    /// user is done; pass that URL to [`Self::complete_issuance`].
    ///
    /// # Errors
    /// - [`VaultKitError::IssuerNotConfigured`] without a provider.
    /// - [`VaultKitError::IssuerRejected`] if the provider does not redirect.
    pub async fn submit_issuance_request(
        &self,
        request: &IdentityRequest,
        redirect_uri: &str,
    ) -> Result<String, VaultKitError> {
        let snapshot = self.state.get();
        let issuer = snapshot.issuer().ok_or(VaultKitError::IssuerNotConfigured)?;
        self.issuer_client(snapshot.endpoint())
            .start_issuance(&issuer.metadata().issuance_start, request, redirect_uri)
            .await
    }

    /// Fetches the identity object behind the URL the provider redirected back to and stores
    /// it. Checks once; call again later on [`VaultKitError::IssuancePending`].
    ///
    /// # Errors
    /// - [`VaultKitError::MalformedReturnUrl`] if the URL carries no continuation.
    /// - [`VaultKitError::IssuerError`], [`VaultKitError::IssuancePending`] or
    ///   [`VaultKitError::UnexpectedIssuerStatus`] per the provider's answer.
    /// - [`VaultKitError::IssuerNotConfigured`] if the provider was cleared meanwhile.
    pub async fn complete_issuance(
        &self,
        returned_url: &str,
    ) -> Result<IdentityObject, VaultKitError> {
        let identity = self
            .issuer_client(&self.network_config())
            .fetch_identity(returned_url)
            .await?;
        self.state.set_identity(identity.clone())?;
        log::info!("identity issued");
        Ok(identity)
    }

    /// Recovers the identity from the first provider in `candidates` that knows it.
    ///
    /// Providers are tried strictly in order; providers after the first success are never
    /// contacted. The winner becomes the configured provider together with the identity.
    ///
    /// # Errors
    /// Returns [`VaultKitError::RecoveryExhausted`] if every provider fails.
    pub async fn recover_identity(
        &self,
        candidates: Vec<IssuerConfig>,
    ) -> Result<IdentityObject, VaultKitError> {
        let attempts = candidates.len();
        let BestEffort { value, .. } = self.try_recover_identity(candidates).await;
        let Some((position, (issuer, identity))) = value else {
            return Err(VaultKitError::RecoveryExhausted { attempts });
        };

        let ip_identity = issuer.ip_identity();
        self.state.update(
            StateUpdate::new()
                .issuer(Some(issuer))
                .identity(Some(identity.clone())),
        )?;
        log::info!("identity recovered from provider {ip_identity} (candidate {position})");
        Ok(identity)
    }

    /// Runs [`Self::recover_identity`] over the wallet proxy's provider directory.
    ///
    /// Directory entries that are not complete configurations are skipped.
    ///
    /// # Errors
    /// Fails if the directory cannot be fetched, otherwise as [`Self::recover_identity`].
    pub async fn recover_identity_from_directory(&self) -> Result<IdentityObject, VaultKitError> {
        let candidates = self
            .identity_providers()
            .await?
            .into_iter()
            .filter_map(|provider| {
                IssuerConfig::try_from(provider)
                    .inspect_err(|e| log::warn!("skipping identity provider: {e}"))
                    .ok()
            })
            .collect();
        self.recover_identity(candidates).await
    }

    pub(crate) async fn try_recover_identity(
        &self,
        candidates: Vec<IssuerConfig>,
    ) -> BestEffort<Option<(usize, (IssuerConfig, IdentityObject))>> {
        let snapshot = &self.state.get();
        first_success(candidates, |_, issuer| async move {
            let identity = self.recover_with(snapshot, &issuer).await?;
            Ok::<_, VaultKitError>((issuer, identity))
        })
        .await
    }

    async fn recover_with(
        &self,
        snapshot: &LifecycleState,
        issuer: &IssuerConfig,
    ) -> Result<IdentityObject, VaultKitError> {
        let recovery_start = issuer.metadata().recovery_start.as_deref().ok_or_else(|| {
            VaultKitError::InvalidIssuer {
                reason: format!("provider {} has no recoveryStart", issuer.ip_identity()),
            }
        })?;
        let path = IdentityPath {
            issuer: issuer.ip_identity(),
            identity_index: snapshot.identity_index(),
        };

        let id_cred_sec =
            self.crypto
                .identity_secret(snapshot.seed(), path, IdentitySecretKind::IdCredSec)?;
        let global_context = cryptographic_parameters(self.client()?.as_ref()).await?;
        let request = self.crypto.create_recovery_request(&RecoveryRequestInput {
            id_cred_sec: &id_cred_sec,
            ip_info: issuer.info(),
            global_context: &global_context,
            timestamp: unix_now()?,
        })?;

        self.issuer_client(snapshot.endpoint())
            .recover(recovery_start, &request)
            .await
    }
}
