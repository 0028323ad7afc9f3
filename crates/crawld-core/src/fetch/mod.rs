//! Raw HTTP/1.x page fetcher.
//!
//! One `fetch` call opens a connection (directly, through a fixed proxy, or
//! through an entry leased from the shared proxy pool), sends a single GET,
//! and parses the response by hand: status line, headers, chunked or plain
//! body capped at the content limit, and gzip decoding. Connections are
//! never reused. The client holds no per-request state and is shared freely
//! between threads.

mod body;
mod conn;
mod decode;
mod error;
mod headers;
mod parse;
mod reader;
mod request;
mod tls;

use std::io::{BufReader, Write};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rustls::ClientConfig;
use url::{Host, Url};

use crate::conf::Properties;
use crate::proxy::{ProxyEntry, ProxyPool};

use body::BUFFER_SIZE;
use conn::Conn;

pub use error::FetchError;
pub use headers::Headers;
pub use reader::PushbackReader;
pub use request::http_date;
pub use tls::{supported_cipher_suites, supported_protocols};

/// Property keys read by `FetchOptions::from_properties`.
pub mod keys {
    pub const TIMEOUT: &str = "http.timeout";
    pub const CONTENT_LIMIT: &str = "http.content.limit";
    pub const AGENT_NAME: &str = "http.agent.name";
    pub const ACCEPT: &str = "http.accept";
    pub const TLS_PROTOCOLS: &str = "http.tls.protocols";
    pub const TLS_CIPHER_SUITES: &str = "http.tls.cipher.suites";
    pub const PROXY_HOST: &str = "http.proxy.host";
    pub const PROXY_PORT: &str = "http.proxy.port";
    pub const PROXY_POOL: &str = "http.proxy.pool";
}

/// How outbound connections are routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyMode {
    Direct,
    Fixed(ProxyEntry),
    /// Lease an entry from the shared pool for every attempt.
    Pooled,
}

/// Per-client fetch settings.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Connect and read timeout; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Content bytes kept per response; `None` is unbounded.
    pub max_content: Option<usize>,
    pub user_agent: String,
    pub accept: String,
    pub tls_protocols: Vec<String>,
    pub tls_cipher_suites: Vec<String>,
    pub proxy: ProxyMode,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(10)),
            max_content: Some(65_536),
            user_agent: format!("crawld/{}", env!("CARGO_PKG_VERSION")),
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
            tls_protocols: Vec::new(),
            tls_cipher_suites: Vec::new(),
            proxy: ProxyMode::Direct,
        }
    }
}

impl FetchOptions {
    /// Read options from a configuration bag. Missing keys keep the defaults;
    /// a timeout of 0 or a negative content limit means unbounded.
    pub fn from_properties(props: &Properties) -> Self {
        let defaults = Self::default();
        let timeout = match props.get(keys::TIMEOUT) {
            Some(_) => match props.get_i64(keys::TIMEOUT, 10_000) {
                ms if ms <= 0 => None,
                ms => Some(Duration::from_millis(ms as u64)),
            },
            None => defaults.timeout,
        };
        let max_content = match props.get(keys::CONTENT_LIMIT) {
            Some(_) => usize::try_from(props.get_i64(keys::CONTENT_LIMIT, 65_536)).ok(),
            None => defaults.max_content,
        };
        let proxy = if props.get_bool(keys::PROXY_POOL, false) {
            ProxyMode::Pooled
        } else {
            match (
                props.get(keys::PROXY_HOST).map(str::trim).filter(|h| !h.is_empty()),
                props.get(keys::PROXY_PORT).and_then(|p| p.trim().parse::<u16>().ok()),
            ) {
                (Some(host), Some(port)) => ProxyMode::Fixed(ProxyEntry::new(host, port)),
                _ => ProxyMode::Direct,
            }
        };
        Self {
            timeout,
            max_content,
            user_agent: props
                .get(keys::AGENT_NAME)
                .map(str::to_string)
                .unwrap_or(defaults.user_agent),
            accept: props
                .get(keys::ACCEPT)
                .map(str::to_string)
                .unwrap_or(defaults.accept),
            tls_protocols: props.get_list(keys::TLS_PROTOCOLS),
            tls_cipher_suites: props.get_list(keys::TLS_CIPHER_SUITES),
            proxy,
        }
    }
}

/// What the crawler already knows about a page.
#[derive(Debug, Clone, Default)]
pub struct PageMeta {
    /// Sent as `If-Modified-Since` when present.
    pub modified_time: Option<DateTime<Utc>>,
}

/// Outcome of one fetch.
#[derive(Debug, Clone)]
pub struct FetchResult {
    url: String,
    code: u16,
    reason: String,
    headers: Headers,
    content: Vec<u8>,
    truncated: bool,
}

impl FetchResult {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Body after transfer decoding and gzip inflation.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn into_content(self) -> Vec<u8> {
        self.content
    }

    /// The body was cut at the content limit.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Http,
    Https,
}

/// Parsed fetch target.
#[derive(Debug)]
struct Target {
    scheme: Scheme,
    /// Host for sockets and SNI (no IPv6 brackets).
    host: String,
    port: u16,
    /// Host header value.
    host_header: String,
    /// Absolute URI, used as request target through a plain proxy.
    absolute: String,
    path: String,
}

impl Target {
    fn parse(url: &str) -> Result<Self, FetchError> {
        let invalid = |reason: String| FetchError::InvalidUrl {
            url: url.to_string(),
            reason,
        };
        let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
        let scheme = match parsed.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => return Err(FetchError::UnsupportedScheme(url.to_string())),
        };
        let host = match parsed.host() {
            Some(Host::Ipv6(addr)) => addr.to_string(),
            Some(h) => h.to_string(),
            None => return Err(invalid("missing host".to_string())),
        };
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port".to_string()))?;
        let authority = parsed.host_str().unwrap_or(&host).to_string();
        let host_header = match parsed.port() {
            Some(p) => format!("{authority}:{p}"),
            None => authority,
        };
        let mut path = parsed.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(q) = parsed.query() {
            path.push('?');
            path.push_str(q);
        }
        let absolute = format!("{}://{}{}", parsed.scheme(), host_header, path);
        Ok(Self {
            scheme,
            host,
            port,
            host_header,
            absolute,
            path,
        })
    }
}

/// Blocking HTTP/1.x client.
pub struct FetchClient {
    options: FetchOptions,
    tls: Arc<ClientConfig>,
    proxy_pool: Option<Arc<ProxyPool>>,
}

impl FetchClient {
    /// Build a client. The TLS allow-lists are resolved here, so a list that
    /// leaves nothing usable fails construction with `FetchError::Tls`. With
    /// `ProxyMode::Pooled` and no pool, every fetch reports an exhausted pool.
    pub fn new(options: FetchOptions, proxy_pool: Option<Arc<ProxyPool>>) -> Result<Self, FetchError> {
        let tls = tls::client_config(&options.tls_protocols, &options.tls_cipher_suites)?;
        Ok(Self {
            options,
            tls,
            proxy_pool,
        })
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Fetch `url` once. No retries happen here.
    pub fn fetch(&self, url: &str, page: &PageMeta) -> Result<FetchResult, FetchError> {
        let target = Target::parse(url)?;
        match &self.options.proxy {
            ProxyMode::Direct => self.attempt(url, &target, None, page),
            ProxyMode::Fixed(entry) => self.attempt(url, &target, Some(entry), page),
            ProxyMode::Pooled => {
                let pool = self
                    .proxy_pool
                    .as_deref()
                    .ok_or(crate::proxy::ProxyExhausted)?;
                let mut lease = pool.lease()?;
                tracing::debug!(
                    proxy = %lease.entry(),
                    available = pool.size(),
                    retired = pool.retired_size(),
                    url,
                    "fetching through pooled proxy"
                );
                let result = self.attempt(url, &target, Some(lease.entry()), page);
                if result.is_ok() {
                    lease.mark_healthy();
                }
                result
            }
        }
    }

    fn attempt(
        &self,
        url: &str,
        target: &Target,
        proxy: Option<&ProxyEntry>,
        page: &PageMeta,
    ) -> Result<FetchResult, FetchError> {
        let (sock_host, sock_port) = match proxy {
            Some(p) => (p.host(), p.port()),
            None => (target.host.as_str(), target.port),
        };
        let mut sock = conn::connect(sock_host, sock_port, self.options.timeout)?;

        let mut stream = match target.scheme {
            Scheme::Http => Conn::Plain(sock),
            Scheme::Https => {
                if proxy.is_some() {
                    conn::tunnel(&mut sock, &target.host, target.port)?;
                }
                let tls = tls::handshake(sock, &target.host, Arc::clone(&self.tls))?;
                Conn::Tls(Box::new(tls))
            }
        };

        let request_target = match (proxy, target.scheme) {
            (Some(_), Scheme::Http) => target.absolute.as_str(),
            _ => target.path.as_str(),
        };
        let head = request::RequestHead {
            target: request_target,
            host: &target.host_header,
            accept: &self.options.accept,
            user_agent: &self.options.user_agent,
            if_modified_since: page.modified_time,
        };
        stream.write_all(&head.to_bytes())?;
        stream.flush()?;

        let mut input = PushbackReader::new(BufReader::with_capacity(BUFFER_SIZE, stream));
        let mut line = Vec::new();
        let mut headers = Headers::new();
        let status = parse::read_head(&mut input, &mut line, &mut headers)?;
        let body = body::read_body(&mut input, &mut headers, self.options.max_content)?;

        let content = if decode::is_gzip(headers.get("Content-Encoding")) {
            decode::gunzip(&body.content, self.options.max_content, body.truncated)?
        } else {
            body.content
        };
        tracing::trace!(
            url,
            code = status.code,
            bytes = content.len(),
            truncated = body.truncated,
            "fetched"
        );
        Ok(FetchResult {
            url: url.to_string(),
            code: status.code,
            reason: status.reason,
            headers,
            content,
            truncated: body.truncated,
        })
    }
}
