//! `crawld fetch <url>` – one request with the raw HTTP client, no server.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use crawld_core::config::CrawldConfig;
use crawld_core::fetch::{FetchClient, FetchOptions, PageMeta, ProxyMode};
use crawld_core::proxy::ProxyEntry;

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// http:// or https:// URL.
    pub url: String,
    /// Send the request through this proxy.
    #[arg(long, value_name = "HOST:PORT")]
    pub proxy: Option<ProxyEntry>,
    /// Keep at most this many content bytes; negative keeps everything.
    #[arg(long, allow_negative_numbers = true)]
    pub max_content: Option<i64>,
    /// Connect and read timeout in milliseconds; 0 waits forever.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Send If-Modified-Since with this RFC 3339 time.
    #[arg(long, value_name = "TIME")]
    pub modified_since: Option<DateTime<Utc>>,
    /// Print the status line and headers only.
    #[arg(long)]
    pub head: bool,
}

/// Options from the config's `[http]` section with the command-line
/// overrides applied. The proxy pool only exists inside a server, so pooled
/// mode falls back to direct.
pub fn fetch_options(cfg: &CrawldConfig, args: &FetchArgs) -> FetchOptions {
    let mut options = FetchOptions::from_properties(&cfg.http.to_properties());
    if let Some(entry) = &args.proxy {
        options.proxy = ProxyMode::Fixed(entry.clone());
    } else if matches!(options.proxy, ProxyMode::Pooled) {
        options.proxy = ProxyMode::Direct;
    }
    if let Some(limit) = args.max_content {
        options.max_content = usize::try_from(limit).ok();
    }
    if let Some(ms) = args.timeout_ms {
        options.timeout = (ms > 0).then(|| Duration::from_millis(ms));
    }
    options
}

pub async fn run_fetch(cfg: &CrawldConfig, args: FetchArgs) -> Result<()> {
    let client = FetchClient::new(fetch_options(cfg, &args), None)?;
    let page = PageMeta {
        modified_time: args.modified_since,
    };
    let url = args.url;
    let result = tokio::task::spawn_blocking(move || client.fetch(&url, &page))
        .await
        .context("fetch task")??;

    eprintln!("{} {}", result.code(), result.reason());
    for (name, value) in result.headers().iter() {
        eprintln!("{name}: {value}");
    }
    if result.is_truncated() {
        eprintln!("(content truncated at {} bytes)", result.content().len());
    }
    if !args.head {
        let mut out = std::io::stdout().lock();
        out.write_all(result.content())?;
        out.flush()?;
    }
    Ok(())
}
