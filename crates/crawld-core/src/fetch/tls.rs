//! rustls client setup with operator allow-lists for protocol versions and
//! cipher suites.

use std::net::TcpStream;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned, SupportedProtocolVersion};

use super::error::FetchError;

pub(crate) type TlsStream = StreamOwned<ClientConnection, TcpStream>;

static PROTOCOLS: [(&str, &SupportedProtocolVersion); 2] = [
    ("TLSv1.2", &rustls::version::TLS12),
    ("TLSv1.3", &rustls::version::TLS13),
];

/// Protocol names this build can negotiate.
pub fn supported_protocols() -> Vec<&'static str> {
    PROTOCOLS.iter().map(|(name, _)| *name).collect()
}

/// Cipher suite names this build can negotiate.
pub fn supported_cipher_suites() -> Vec<String> {
    rustls::crypto::ring::default_provider()
        .cipher_suites
        .iter()
        .map(|s| suite_name(s))
        .collect()
}

fn suite_name(suite: &rustls::SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

// "TLS13_AES_128_GCM_SHA256" and "TLS_AES_128_GCM_SHA256" name the same suite.
fn normalize_suite(name: &str) -> String {
    let upper = name.trim().to_ascii_uppercase();
    match upper.strip_prefix("TLS13_") {
        Some(rest) => format!("TLS_{rest}"),
        None => upper,
    }
}

/// Build a client config restricted to the intersection of the allow-lists
/// with what the provider supports. An empty list means no restriction.
pub(crate) fn client_config(
    protocols: &[String],
    cipher_suites: &[String],
) -> Result<Arc<ClientConfig>, FetchError> {
    let mut provider = rustls::crypto::ring::default_provider();
    if !cipher_suites.is_empty() {
        let wanted: Vec<String> = cipher_suites.iter().map(|s| normalize_suite(s)).collect();
        provider
            .cipher_suites
            .retain(|s| wanted.contains(&normalize_suite(&suite_name(s))));
        if provider.cipher_suites.is_empty() {
            return Err(FetchError::Tls(format!(
                "none of the configured cipher suites are supported: {}",
                cipher_suites.join(",")
            )));
        }
    }

    let versions: Vec<&'static SupportedProtocolVersion> = PROTOCOLS
        .iter()
        .filter(|(name, _)| {
            protocols.is_empty() || protocols.iter().any(|p| p.trim().eq_ignore_ascii_case(name))
        })
        .map(|(_, v)| *v)
        .collect();
    if versions.is_empty() {
        return Err(FetchError::Tls(format!(
            "none of the configured protocols are supported: {}",
            protocols.join(",")
        )));
    }

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&versions)
        .map_err(|e| FetchError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Run the TLS handshake over an established (possibly tunnelled) socket.
pub(crate) fn handshake(
    sock: TcpStream,
    host: &str,
    config: Arc<ClientConfig>,
) -> Result<TlsStream, FetchError> {
    let name = ServerName::try_from(host.to_string())
        .map_err(|e| FetchError::Tls(format!("invalid server name {host}: {e}")))?;
    let conn = ClientConnection::new(config, name).map_err(|e| FetchError::Tls(e.to_string()))?;
    let mut stream = StreamOwned::new(conn, sock);
    while stream.conn.is_handshaking() {
        stream
            .conn
            .complete_io(&mut stream.sock)
            .map_err(|e| FetchError::Tls(format!("handshake with {host} failed: {e}")))?;
    }
    tracing::trace!(
        host,
        version = ?stream.conn.protocol_version(),
        suite = ?stream.conn.negotiated_cipher_suite().map(|s| s.suite()),
        "TLS established"
    );
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_lists_accept_everything() {
        assert!(client_config(&[], &[]).is_ok());
        assert_eq!(supported_protocols(), vec!["TLSv1.2", "TLSv1.3"]);
        assert!(!supported_cipher_suites().is_empty());
    }

    #[test]
    fn protocol_allow_list_is_intersected() {
        assert!(client_config(&["tlsv1.3".to_string()], &[]).is_ok());
        let err = client_config(&["SSLv3".to_string()], &[]).unwrap_err();
        assert!(matches!(err, FetchError::Tls(_)));
    }

    #[test]
    fn cipher_names_accept_both_tls13_spellings() {
        let ok = client_config(&[], &["TLS_AES_128_GCM_SHA256".to_string()]);
        assert!(ok.is_ok());
        let ok = client_config(&[], &["TLS13_AES_128_GCM_SHA256".to_string()]);
        assert!(ok.is_ok());
        let err = client_config(&[], &["TLS_RSA_WITH_RC4_128_MD5".to_string()]).unwrap_err();
        assert!(matches!(err, FetchError::Tls(_)));
    }
}
