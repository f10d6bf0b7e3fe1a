use std::sync::Arc;
use std::time::Duration;

use crate::{
    error::VaultKitError, AccountTransaction, FinalizedOutcome, NodeClient, Signature,
    TransactionHash, TransactionStatus, TransactionSummary, FINALIZATION_POLL_INTERVAL,
};

/// How the finalization poller waits and when it gives up on transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between two status queries.
    pub interval: Duration,
    /// Consecutive transient failures tolerated before surfacing a `PollingError`.
    /// `None` retries for as long as the node keeps dropping connections.
    pub max_transient_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: FINALIZATION_POLL_INTERVAL,
            max_transient_retries: None,
        }
    }
}

/// Waits for submitted block items to be finalized.
///
/// The poller keeps the client it was created with: switching networks afterwards does not
/// redirect a poll that is already running.
#[derive(Clone)]
pub struct FinalizationPoller {
    client: Arc<dyn NodeClient>,
    policy: RetryPolicy,
}

impl FinalizationPoller {
    /// Creates a poller over `client`.
    #[must_use]
    pub fn new(client: Arc<dyn NodeClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Submits a signed account transaction and waits for its finalization.
    ///
    /// # Errors
    /// Returns [`VaultKitError::Node`] if the submission itself fails, otherwise whatever
    /// [`Self::await_finalization`] returns.
    pub async fn submit_and_finalize(
        &self,
        transaction: &AccountTransaction,
        signature: &Signature,
    ) -> Result<FinalizedOutcome, VaultKitError> {
        let hash = self
            .client
            .send_transaction(transaction, signature)
            .await
            .map_err(VaultKitError::node("send_transaction"))?;
        log::debug!("submitted transaction {hash}");
        self.await_finalization(&hash).await
    }

    /// Queries the status of `hash` every [`RetryPolicy::interval`] until it is finalized.
    ///
    /// # Errors
    /// - [`VaultKitError::TransactionFailed`] if the finalized item was rejected.
    /// - [`VaultKitError::PollingError`] on a non-transient node error, or once the configured
    ///   transient retry cap is exceeded.
    pub async fn await_finalization(
        &self,
        hash: &TransactionHash,
    ) -> Result<FinalizedOutcome, VaultKitError> {
        let mut transient_failures: u32 = 0;
        loop {
            match self.client.transaction_status(hash).await {
                Ok(TransactionStatus::Finalized { outcome }) => {
                    if let Some(TransactionSummary::Failed { reject_reason }) = &outcome.summary {
                        return Err(VaultKitError::TransactionFailed {
                            summary: reject_reason.clone(),
                        });
                    }
                    log::info!("transaction {hash} finalized in block {}", outcome.block_hash);
                    return Ok(outcome);
                }
                Ok(TransactionStatus::Pending) => {
                    transient_failures = 0;
                }
                Err(err) if err.is_transient() => {
                    transient_failures = transient_failures.saturating_add(1);
                    if self
                        .policy
                        .max_transient_retries
                        .is_some_and(|max| transient_failures > max)
                    {
                        return Err(VaultKitError::PollingError {
                            error: format!(
                                "gave up after {transient_failures} dropped connections: {err}"
                            ),
                        });
                    }
                    log::warn!("transient error while polling transaction {hash}: {err}");
                }
                Err(err) => {
                    return Err(VaultKitError::PollingError {
                        error: err.to_string(),
                    })
                }
            }
            tokio::time::sleep(self.policy.interval).await;
        }
    }
}
