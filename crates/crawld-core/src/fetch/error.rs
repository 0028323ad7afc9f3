//! Fetch attempt failures.

use std::io;

use crate::proxy::ProxyExhausted;

/// Why one fetch attempt failed. Every variant is scoped to the attempt; the
/// retry module decides which ones are worth another try.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unknown scheme (not http/https) for url: {0}")]
    UnsupportedScheme(String),

    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS: {0}")]
    Tls(String),

    /// Malformed status line, bad framing, or premature end of stream.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    ProxyExhausted(#[from] ProxyExhausted),

    #[error("content decoding failed: {0}")]
    Decode(#[source] io::Error),

    /// Read/write failure on an established connection (including read timeouts).
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
}

impl FetchError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        FetchError::Protocol(msg.into())
    }

    pub(crate) fn eof() -> Self {
        FetchError::Protocol("unexpected end of stream".to_string())
    }

    /// True for read timeouts on an established connection.
    pub fn is_timeout(&self) -> bool {
        match self {
            FetchError::ConnectTimeout { .. } => true,
            FetchError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}
