//! Retry and backoff policy.
//!
//! This module encapsulates error classification (timeouts, throttling,
//! connection failures) and exponential backoff decisions so that fetch
//! jobs share a consistent policy. The fetch client itself never retries.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{classify, classify_fetch_error, classify_http_status};
pub use error::AttemptError;
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::run_with_retry;
