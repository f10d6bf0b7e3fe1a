use std::collections::BTreeMap;

use secrecy::SecretString;
use strum::IntoEnumIterator;

use crate::{
    error::VaultKitError, AccountAddress, AccountEntry, AccountTransaction, AttributeKind,
    CcdAmount, CredentialDeploymentInput, CredentialPath, CredentialPublicKeys,
    FinalizationPoller, FinalizedOutcome, Seed, Signature, TransactionExpiry, TransactionHash,
    TransactionHeader, TransactionPayload, CREDENTIAL_DEPLOYMENT_EXPIRY, TRANSFER_EXPIRY,
};

use super::{cryptographic_parameters, VaultController};

impl VaultController {
    /// Deploys a new account at the current credential counter and waits for finalization.
    ///
    /// The account is recorded and the counter advanced only once the deployment is final, so
    /// a failed attempt can simply be retried and reuses the same index.
    ///
    /// # Errors
    /// - [`VaultKitError::IdentityNotInitialized`] without an identity object.
    /// - [`VaultKitError::DerivationIncomplete`] if an attribute lacks commitment randomness.
    /// - [`VaultKitError::DeploymentRejected`] if the node refuses the deployment.
    /// - [`VaultKitError::TransactionFailed`] or [`VaultKitError::PollingError`] from
    ///   finalization.
    /// - [`VaultKitError::ConnectionError`] if no node is connected after a failed switch.
    pub async fn create_account(&self) -> Result<AccountEntry, VaultKitError> {
        let snapshot = self.state.get();
        let identity = snapshot
            .identity()
            .ok_or(VaultKitError::IdentityNotInitialized)?;
        let issuer = snapshot.issuer().ok_or(VaultKitError::IssuerNotConfigured)?;
        let credential_index = snapshot.cred_counter();
        let path = snapshot.identity_path()?.credential(credential_index);
        let seed = snapshot.seed();

        let public_key = self.crypto.account_public_key(seed, path)?;
        let attribute_randomness = self.attribute_randomness(seed, path)?;

        let client = self.client()?;
        let global_context = cryptographic_parameters(client.as_ref()).await?;
        let expiry = TransactionExpiry::from_now(CREDENTIAL_DEPLOYMENT_EXPIRY)?;

        let deployment = self.crypto.create_credential_deployment(
            &CredentialDeploymentInput {
                issuer,
                global_context: &global_context,
                identity_object: identity,
                revealed_attributes: Vec::new(),
                seed,
                path,
                public_keys: CredentialPublicKeys::single_ed25519(public_key),
                attribute_randomness,
            },
            expiry,
        )?;
        let signing_key = self.crypto.account_signing_key(seed, path)?;
        let signatures = vec![self
            .crypto
            .sign_credential_deployment(&deployment, &signing_key)?];
        let payload = self
            .crypto
            .serialize_credential_deployment(&deployment, &signatures)?;

        let accepted = client
            .send_credential_deployment(&payload, expiry)
            .await
            .map_err(VaultKitError::node("send_credential_deployment"))?;
        if !accepted {
            return Err(VaultKitError::DeploymentRejected);
        }

        let hash = self
            .crypto
            .credential_deployment_hash(&deployment, &signatures)?;
        log::debug!("credential deployment {hash} submitted at index {credential_index}");
        FinalizationPoller::new(client, self.polling)
            .await_finalization(&hash)
            .await?;

        let entry = AccountEntry {
            address: self.crypto.account_address(&deployment.credential_id)?,
            credential_index,
        };
        self.state.record_account(entry.clone())?;
        log::info!("account {} created at index {credential_index}", entry.address);
        Ok(entry)
    }

    /// Addresses of the deployed accounts, in creation order.
    #[must_use]
    pub fn accounts(&self) -> Vec<AccountAddress> {
        self.state
            .get()
            .accounts()
            .iter()
            .map(|account| account.address.clone())
            .collect()
    }

    /// The balance available for transfers.
    ///
    /// # Errors
    /// - [`VaultKitError::AccountNotFound`] if the node does not know the account.
    /// - [`VaultKitError::ConnectionError`] if no node is connected after a failed switch.
    pub async fn balance(&self, address: &AccountAddress) -> Result<CcdAmount, VaultKitError> {
        let not_found = || VaultKitError::AccountNotFound {
            address: address.to_string(),
        };
        match self.client()?.account_info(address).await {
            Ok(info) => info.account_available_balance.ok_or_else(not_found),
            Err(err) if err.is_not_found() => Err(not_found()),
            Err(err) => Err(VaultKitError::node("account_info")(err)),
        }
    }

    /// Builds a simple transfer of `amount` from `sender` to `receiver`.
    ///
    /// # Errors
    /// Returns [`VaultKitError::Node`] if the sender's nonce cannot be fetched.
    pub async fn create_transfer(
        &self,
        receiver: AccountAddress,
        amount: CcdAmount,
        sender: AccountAddress,
    ) -> Result<AccountTransaction, VaultKitError> {
        let nonce = self
            .client()?
            .next_nonce(&sender)
            .await
            .map_err(VaultKitError::node("next_nonce"))?;
        Ok(AccountTransaction {
            header: TransactionHeader {
                sender,
                nonce,
                expiry: TransactionExpiry::from_now(TRANSFER_EXPIRY)?,
            },
            payload: TransactionPayload::Transfer {
                amount,
                to_address: receiver,
            },
        })
    }

    /// Signs `transaction` with the key of its sender, which must be one of our accounts.
    ///
    /// # Errors
    /// - [`VaultKitError::AccountNotFound`] if the sender is not a deployed account.
    /// - [`VaultKitError::IssuerNotConfigured`] without a provider.
    pub fn sign_transaction(
        &self,
        transaction: &AccountTransaction,
    ) -> Result<Signature, VaultKitError> {
        let snapshot = self.state.get();
        let sender = &transaction.header.sender;
        let account = snapshot
            .accounts()
            .iter()
            .find(|account| &account.address == sender)
            .ok_or_else(|| VaultKitError::AccountNotFound {
                address: sender.to_string(),
            })?;

        let path = snapshot
            .identity_path()?
            .credential(account.credential_index);
        let signing_key = self.crypto.account_signing_key(snapshot.seed(), path)?;
        Ok(self.crypto.sign_transaction(transaction, &signing_key)?)
    }

    /// Submits a signed transaction through the current node and waits for finalization.
    ///
    /// # Errors
    /// See [`FinalizationPoller::submit_and_finalize`].
    pub async fn send_transaction(
        &self,
        transaction: &AccountTransaction,
        signature: &Signature,
    ) -> Result<FinalizedOutcome, VaultKitError> {
        self.poller()?
            .submit_and_finalize(transaction, signature)
            .await
    }

    /// Waits for an already submitted block item to be finalized.
    ///
    /// # Errors
    /// See [`FinalizationPoller::await_finalization`].
    pub async fn await_finalization(
        &self,
        hash: &TransactionHash,
    ) -> Result<FinalizedOutcome, VaultKitError> {
        self.poller()?.await_finalization(hash).await
    }

    fn attribute_randomness(
        &self,
        seed: &Seed,
        path: CredentialPath,
    ) -> Result<BTreeMap<AttributeKind, SecretString>, VaultKitError> {
        AttributeKind::iter()
            .map(|attribute| {
                let randomness = self
                    .crypto
                    .attribute_randomness(seed, path, attribute)?
                    .ok_or_else(|| VaultKitError::DerivationIncomplete {
                        attribute: attribute.to_string(),
                    })?;
                Ok::<_, VaultKitError>((attribute, randomness))
            })
            .collect()
    }
}
