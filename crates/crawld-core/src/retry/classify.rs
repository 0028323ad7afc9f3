//! Classify HTTP status and fetch errors into retry policy error kinds.

use crate::fetch::FetchError;
use crate::retry::error::AttemptError;
use crate::retry::policy::ErrorKind;

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u16) -> ErrorKind {
    match code {
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code),
        _ => ErrorKind::Other,
    }
}

/// Classify a fetch error for retry decisions.
pub fn classify_fetch_error(e: &FetchError) -> ErrorKind {
    if e.is_timeout() {
        return ErrorKind::Timeout;
    }
    match e {
        FetchError::Connect { .. } | FetchError::Io(_) => ErrorKind::Connection,
        // Pool may be replenished by the time we try again.
        FetchError::ProxyExhausted(_) => ErrorKind::Throttled,
        _ => ErrorKind::Other,
    }
}

/// Classify an attempt error (transport or HTTP) into an ErrorKind.
pub fn classify(e: &AttemptError) -> ErrorKind {
    match e {
        AttemptError::Fetch(fe) => classify_fetch_error(fe),
        AttemptError::Status(code) => classify_http_status(*code),
    }
}
