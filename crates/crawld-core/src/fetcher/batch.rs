//! Batch mode: fetch a list of URLs once each (with retries).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{ARG_MODIFIED_SINCE, ARG_URL, ARG_URLS};
use crate::fetch::{FetchClient, FetchResult, PageMeta};
use crate::retry::{classify_http_status, run_with_retry, AttemptError, ErrorKind, RetryPolicy};
use crate::scheduler::JobContext;

fn urls(ctx: &JobContext) -> Result<Vec<String>> {
    if let Some(list) = ctx.args().get(ARG_URLS) {
        let list = list.as_array().context("`urls` must be an array of strings")?;
        return list
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .context("`urls` must be an array of strings")
            })
            .collect();
    }
    match ctx.arg_str(ARG_URL) {
        Some(url) => Ok(vec![url.to_string()]),
        None => anyhow::bail!("FETCH job needs a `urls` argument"),
    }
}

fn page_meta(ctx: &JobContext) -> Result<PageMeta> {
    let modified_time = ctx
        .arg_str(ARG_MODIFIED_SINCE)
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .with_context(|| format!("bad `modified_since` time: {s}"))
        })
        .transpose()?;
    Ok(PageMeta { modified_time })
}

fn fetch_one(
    client: &FetchClient,
    url: &str,
    page: &PageMeta,
    policy: &RetryPolicy,
) -> Result<FetchResult, AttemptError> {
    run_with_retry(policy, |attempt| {
        let result = client.fetch(url, page)?;
        match classify_http_status(result.code()) {
            ErrorKind::Other => Ok(result),
            _ => {
                tracing::debug!(url, attempt, code = result.code(), "retryable status");
                Err(AttemptError::Status(result.code()))
            }
        }
    })
}

pub(super) fn run(ctx: &JobContext, client: &FetchClient, policy: &RetryPolicy) -> Result<()> {
    let urls = urls(ctx)?;
    let page = page_meta(ctx)?;
    ctx.record("total", urls.len() as u64);
    tracing::info!(job_id = ctx.job_id(), count = urls.len(), "fetching batch");

    for url in &urls {
        ctx.check_stop()?;
        match fetch_one(client, url, &page, policy) {
            Ok(result) => {
                ctx.increment("fetched", 1);
                ctx.increment("bytes", result.content().len() as i64);
                if result.code() == 304 {
                    ctx.increment("not_modified", 1);
                }
                if result.is_truncated() {
                    ctx.increment("truncated", 1);
                }
                tracing::debug!(url = %url, code = result.code(), "fetched");
            }
            Err(e) => {
                ctx.increment("failed", 1);
                ctx.record("last_error", Value::from(format!("{url}: {e}")));
                tracing::warn!(url = %url, "fetch failed: {e}");
            }
        }
    }
    Ok(())
}
