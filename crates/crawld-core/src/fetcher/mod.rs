//! FETCH job body.
//!
//! Batch mode fetches the URLs in the `urls` argument with retries and
//! records counters. Server mode (`mode = "server"`) runs a fetcher server
//! on the job's leased port until the job is asked to stop.

mod batch;
mod server;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::discovery::ServiceRegistry;
use crate::fetch::{FetchClient, FetchOptions};
use crate::proxy::ProxyPool;
use crate::retry::RetryPolicy;
use crate::scheduler::{JobContext, JobHandler};

pub use server::request as fetcher_request;

/// Argument naming the run mode; `"server"` selects the fetcher server.
pub const ARG_MODE: &str = "mode";
/// JSON array of URLs for batch mode (a single `url` string also works).
pub const ARG_URLS: &str = "urls";
pub const ARG_URL: &str = "url";
/// RFC 3339 time sent as `If-Modified-Since` in batch mode.
pub const ARG_MODIFIED_SINCE: &str = "modified_since";
/// Port of a fetcher server job, copied into its args for listings.
pub const ARG_SERVER_PORT: &str = "server_port";
pub const MODE_SERVER: &str = "server";

/// Shared resources of every FETCH job.
pub struct FetchJob {
    host: String,
    discovery: Arc<dyn ServiceRegistry>,
    proxies: Arc<ProxyPool>,
    retry: RetryPolicy,
}

impl FetchJob {
    pub fn new(
        host: impl Into<String>,
        discovery: Arc<dyn ServiceRegistry>,
        proxies: Arc<ProxyPool>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            host: host.into(),
            discovery,
            proxies,
            retry,
        }
    }
}

impl JobHandler for FetchJob {
    fn run(&self, ctx: &JobContext) -> Result<()> {
        let options = FetchOptions::from_properties(ctx.conf());
        let client = FetchClient::new(options, Some(Arc::clone(&self.proxies)))
            .context("build fetch client")?;

        if ctx.arg_str(ARG_MODE) == Some(MODE_SERVER) {
            let port = ctx
                .port()
                .context("fetcher server job was submitted without a port lease")?;
            server::serve(ctx, Arc::new(client), &self.host, port, &*self.discovery)
        } else {
            batch::run(ctx, &client, &self.retry)
        }
    }
}
