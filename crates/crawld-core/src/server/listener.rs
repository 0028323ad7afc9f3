//! Control listener: one command line in, one JSON reply line out.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::CrawlServer;
use crate::control::{ControlCommand, ControlReply};

/// Spawns the accept loop. Each connection runs on its own task, so a
/// `stop` that aborts the accept loop still gets its reply written.
pub(super) fn spawn(server: Arc<CrawlServer>, listener: TcpListener) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "control connection");
                    let server = Arc::clone(&server);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(server, stream).await {
                            tracing::debug!(%peer, "control connection: {e}");
                        }
                    });
                }
                Err(e) => tracing::debug!("control listener accept: {}", e),
            }
        }
    })
}

async fn handle_connection(server: Arc<CrawlServer>, stream: TcpStream) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = match line.parse::<ControlCommand>() {
            Ok(cmd) => {
                tracing::debug!(%cmd, "control command");
                dispatch(&server, cmd).await
            }
            Err(e) => ControlReply::err(format!("{e:#}")),
        };
        let mut out = serde_json::to_string(&reply).unwrap_or_else(|e| {
            format!(r#"{{"ok":false,"error":"serialize reply: {e}"}}"#)
        });
        out.push('\n');
        write_half.write_all(out.as_bytes()).await?;
        write_half.flush().await?;
    }
    Ok(())
}

async fn dispatch(server: &CrawlServer, cmd: ControlCommand) -> ControlReply {
    match cmd {
        ControlCommand::Status => ControlReply::ok(server.status().await),
        ControlCommand::Stop { force } => ControlReply::ok(server.stop(force).await),
        ControlCommand::Jobs { crawl_id, state } => {
            ControlReply::ok(server.list_jobs(crawl_id.as_deref(), state))
        }
        ControlCommand::Kill { job_id, force } => match server.stop_job(&job_id, force) {
            Ok(stopped) => ControlReply::ok(stopped),
            Err(e) => ControlReply::err(e.to_string()),
        },
        ControlCommand::Ports { service_type } => match server.ports_status(service_type) {
            Ok(ports) => ControlReply::ok(ports),
            Err(e) => ControlReply::err(e.to_string()),
        },
    }
}
