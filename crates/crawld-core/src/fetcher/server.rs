//! Fetcher server: a line-oriented TCP service that fetches URLs on demand.
//!
//! Protocol: the client sends one URL per line; each gets either
//! `OK <code> <length>\n` followed by `<length>` content bytes, or
//! `ERR <message>\n`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::discovery::{ServerInstance, ServiceRegistry, ServiceType};
use crate::fetch::{FetchClient, PageMeta};
use crate::scheduler::JobContext;

const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Unregisters the instance when the server loop exits, however it exits.
struct Registration<'a> {
    discovery: &'a dyn ServiceRegistry,
    instance: ServerInstance,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.discovery.unregister(&self.instance) {
            tracing::warn!(instance = %self.instance, "unregister fetcher server: {e:#}");
        }
    }
}

pub(super) fn serve(
    ctx: &JobContext,
    client: Arc<FetchClient>,
    host: &str,
    port: u16,
    discovery: &dyn ServiceRegistry,
) -> Result<()> {
    // the scheduler holds the port lease until this job is terminal
    let listener = TcpListener::bind((host, port))
        .with_context(|| format!("bind fetcher server on {host}:{port}"))?;
    listener.set_nonblocking(true)?;

    let instance = ServerInstance::new(Some(host.to_string()), port, ServiceType::FetcherServer);
    discovery
        .register(&instance)
        .with_context(|| format!("register {instance}"))?;
    let _registration = Registration {
        discovery,
        instance,
    };
    ctx.record("server_port", port);
    tracing::info!(job_id = ctx.job_id(), port, "fetcher server listening");

    loop {
        ctx.check_stop()?;
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                tracing::debug!(%peer, "fetcher connection");
                let client = Arc::clone(&client);
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, &client, &ctx) {
                        tracing::debug!(%peer, "fetcher connection ended: {e}");
                    }
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => return Err(e).context("fetcher server accept"),
        }
    }
}

fn handle_connection(stream: TcpStream, client: &FetchClient, ctx: &JobContext) -> Result<()> {
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = line?;
        let url = line.trim();
        if url.is_empty() {
            continue;
        }
        if ctx.is_stop_requested() {
            writer.write_all(b"ERR fetcher server is stopping\n")?;
            break;
        }
        match client.fetch(url, &PageMeta::default()) {
            Ok(result) => {
                ctx.increment("fetched", 1);
                writer.write_all(
                    format!("OK {} {}\n", result.code(), result.content().len()).as_bytes(),
                )?;
                writer.write_all(result.content())?;
            }
            Err(e) => {
                ctx.increment("failed", 1);
                let msg = e.to_string().replace(['\r', '\n'], " ");
                writer.write_all(format!("ERR {msg}\n").as_bytes())?;
            }
        }
        writer.flush()?;
    }
    Ok(())
}

/// Ask a fetcher server at `addr` to fetch `url`. Returns the status code and
/// content, or the server's error message as an error.
pub fn request(addr: &str, url: &str) -> Result<(u16, Vec<u8>)> {
    let mut stream =
        TcpStream::connect(addr).with_context(|| format!("connect to fetcher server {addr}"))?;
    stream.write_all(format!("{url}\n").as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut head = String::new();
    reader.read_line(&mut head)?;
    let head = head.trim_end();
    if let Some(msg) = head.strip_prefix("ERR ") {
        anyhow::bail!("fetcher server: {msg}");
    }
    let mut parts = head.strip_prefix("OK ").context("malformed fetcher reply")?.split(' ');
    let code: u16 = parts
        .next()
        .and_then(|c| c.parse().ok())
        .context("malformed fetcher reply status")?;
    let len: usize = parts
        .next()
        .and_then(|l| l.parse().ok())
        .context("malformed fetcher reply length")?;
    let mut content = vec![0u8; len];
    reader.read_exact(&mut content)?;
    Ok((code, content))
}
