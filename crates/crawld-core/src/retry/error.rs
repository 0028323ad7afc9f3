//! Per-attempt failure fed to the retry loop.

use crate::fetch::FetchError;

/// Error returned by a single fetch attempt (transport failure or an HTTP
/// status worth retrying). Used so we can classify and decide retries before
/// converting to anyhow.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Response arrived but carried a retryable status.
    #[error("HTTP {0}")]
    Status(u16),
}
