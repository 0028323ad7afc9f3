use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::conf::Properties;
use crate::fetch::keys;

/// Control listener address (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host the control listener binds to and advertises to discovery.
    pub host: String,
    /// Control listener port. 0 picks an ephemeral port (tests).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8182,
        }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of jobs executing concurrently.
    pub worker_count: usize,
    /// Maximum number of jobs admitted (queued or running) before submit is rejected.
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            queue_capacity: 100,
        }
    }
}

/// Port range handed out to fetcher servers (inclusive on both ends).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub fetcher_base: u16,
    pub fetcher_max: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            fetcher_base: 21000,
            fetcher_max: 21099,
        }
    }
}

/// Defaults for the `default` fetch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Connect and read timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum content bytes kept per fetch; negative means unbounded.
    pub max_content: i64,
    pub user_agent: String,
    pub accept: String,
    /// Allowed TLS protocol names (e.g. "TLSv1.2"); empty allows all supported.
    pub tls_protocols: Vec<String>,
    /// Allowed TLS cipher suite names; empty allows all supported.
    pub tls_cipher_suites: Vec<String>,
    /// Fixed outbound proxy host, if any.
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    /// Route fetches through the rotating proxy pool.
    pub use_proxy_pool: bool,
    /// File with one `host:port` proxy per line, loaded into the pool at startup.
    pub proxy_list: Option<PathBuf>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_content: 65_536,
            user_agent: format!("crawld/{}", env!("CARGO_PKG_VERSION")),
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
                .to_string(),
            tls_protocols: Vec::new(),
            tls_cipher_suites: Vec::new(),
            proxy_host: None,
            proxy_port: None,
            use_proxy_pool: false,
            proxy_list: None,
        }
    }
}

impl HttpConfig {
    /// Property bag used to seed the `default` configuration in `ConfManager`.
    pub fn to_properties(&self) -> Properties {
        let mut props = Properties::new();
        props.set(keys::TIMEOUT, self.timeout_ms.to_string());
        props.set(keys::CONTENT_LIMIT, self.max_content.to_string());
        props.set(keys::AGENT_NAME, self.user_agent.clone());
        props.set(keys::ACCEPT, self.accept.clone());
        props.set(keys::TLS_PROTOCOLS, self.tls_protocols.join(","));
        props.set(keys::TLS_CIPHER_SUITES, self.tls_cipher_suites.join(","));
        if let (Some(host), Some(port)) = (&self.proxy_host, self.proxy_port) {
            props.set(keys::PROXY_HOST, host.clone());
            props.set(keys::PROXY_PORT, port.to_string());
        }
        props.set(keys::PROXY_POOL, self.use_proxy_pool.to_string());
        props
    }
}

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per URL (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 0.25,
            max_delay_secs: 30,
        }
    }
}

/// Global configuration loaded from `~/.config/crawld/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawldConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    /// Optional retry policy for FETCH jobs; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("crawld")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<CrawldConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = CrawldConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: CrawldConfig = toml::from_str(&data)?;
    Ok(cfg)
}
