//! Best-effort iteration: try candidates in order, keep going past failures, and remember what
//! was swallowed along the way.

use std::future::Future;

use crate::error::VaultKitError;

/// A failure that was logged and skipped instead of being surfaced.
#[derive(Debug)]
pub struct Suppressed {
    /// Position of the candidate (issuer position or derivation index) that failed.
    pub position: usize,
    /// The swallowed error.
    pub error: VaultKitError,
}

/// The outcome of a best-effort run together with every failure it swallowed.
#[derive(Debug)]
pub struct BestEffort<T> {
    /// The result of the run.
    pub value: T,
    /// Failures that did not abort the run, in the order they happened.
    pub suppressed: Vec<Suppressed>,
}

/// Runs `attempt` over `candidates` strictly in order and stops at the first success.
///
/// Later candidates are never attempted once one succeeds. The returned value holds the
/// winning position and result, or `None` when every candidate failed.
#[allow(clippy::future_not_send)]
pub async fn first_success<I, C, T, F, Fut>(
    candidates: I,
    mut attempt: F,
) -> BestEffort<Option<(usize, T)>>
where
    I: IntoIterator<Item = C>,
    F: FnMut(usize, C) -> Fut,
    Fut: Future<Output = Result<T, VaultKitError>>,
{
    let mut suppressed = Vec::new();
    for (position, candidate) in candidates.into_iter().enumerate() {
        match attempt(position, candidate).await {
            Ok(value) => {
                return BestEffort {
                    value: Some((position, value)),
                    suppressed,
                }
            }
            Err(error) => {
                log::error!("attempt with candidate {position} failed: {error}");
                suppressed.push(Suppressed { position, error });
            }
        }
    }
    BestEffort {
        value: None,
        suppressed,
    }
}
