use crate::{
    error::VaultKitError, AccountEntry, BestEffort, CredentialPath, CryptographicParameters,
    LifecycleState, NodeClient, StateUpdate, Suppressed,
};

use super::{cryptographic_parameters, VaultController};

/// What an account recovery scan found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Accounts found on-chain, by ascending credential index.
    pub accounts: Vec<AccountEntry>,
    /// The last index probed. Becomes the new credential counter.
    pub last_index: u32,
}

enum Probe {
    Found(AccountEntry),
    Empty,
    Gap,
}

impl VaultController {
    /// Rebuilds the account list by probing derivation indices on-chain.
    ///
    /// Indices are probed in order until the node reports an account as not found or the
    /// probe limit is reached. Any other failure at an index is logged and the scan moves on.
    /// The accounts found replace the stored ones and the credential counter is set to the
    /// last probed index.
    ///
    /// # Errors
    /// - [`VaultKitError::IssuerNotConfigured`] without a provider.
    /// - [`VaultKitError::Node`] if the cryptographic parameters cannot be fetched.
    pub async fn restore_accounts(&self) -> Result<Vec<AccountEntry>, VaultKitError> {
        let snapshot = self.state.get();
        let BestEffort { value, suppressed } = self.scan_accounts(&snapshot).await?;
        if !suppressed.is_empty() {
            log::warn!(
                "account scan skipped {} indices after errors",
                suppressed.len()
            );
        }

        self.state.update(
            StateUpdate::new()
                .accounts(value.accounts.clone())
                .cred_counter(value.last_index),
        )?;
        log::info!(
            "restored {} accounts, credential counter at {}",
            value.accounts.len(),
            value.last_index
        );
        Ok(value.accounts)
    }

    pub(crate) async fn scan_accounts(
        &self,
        snapshot: &LifecycleState,
    ) -> Result<BestEffort<ScanOutcome>, VaultKitError> {
        let identity_path = snapshot.identity_path()?;
        let client = self.client()?;
        let global_context = cryptographic_parameters(client.as_ref()).await?;

        let mut accounts = Vec::new();
        let mut suppressed = Vec::new();
        let mut last_index = 0;

        for (position, index) in (0..self.scan.max_probe).enumerate() {
            last_index = index;
            let path = identity_path.credential(index);
            match self
                .probe(client.as_ref(), snapshot, path, &global_context)
                .await
            {
                Ok(Probe::Found(entry)) => accounts.push(entry),
                Ok(Probe::Empty) => log::warn!("no account info found for index {index}"),
                Ok(Probe::Gap) => break,
                Err(error) => {
                    log::error!("error recovering account at index {index}: {error}");
                    suppressed.push(Suppressed { position, error });
                }
            }
            tokio::time::sleep(self.scan.probe_delay).await;
        }

        Ok(BestEffort {
            value: ScanOutcome {
                accounts,
                last_index,
            },
            suppressed,
        })
    }

    async fn probe(
        &self,
        client: &dyn NodeClient,
        snapshot: &LifecycleState,
        path: CredentialPath,
        global_context: &CryptographicParameters,
    ) -> Result<Probe, VaultKitError> {
        let credential_id = self
            .crypto
            .credential_id(snapshot.seed(), path, global_context)?;
        let address = self.crypto.account_address(&credential_id)?;

        match client.account_info(&address).await {
            Ok(info) if info.account_address.is_some() => Ok(Probe::Found(AccountEntry {
                address,
                credential_index: path.credential_index,
            })),
            Ok(_) => Ok(Probe::Empty),
            Err(err) if err.is_not_found() => Ok(Probe::Gap),
            Err(err) => Err(VaultKitError::node("account_info")(err)),
        }
    }
}
