//! Job stop signalling and the control line protocol.
//!
//! Running jobs carry a cooperative stop flag (see `scheduler::JobContext`);
//! a job body that notices it returns `JobStopped`. Remote operators talk to
//! a running server over TCP: one command line in, one JSON line out.
//!
//! Commands: `status`, `stop [force]`, `jobs [crawl_id|-] [STATE|-]`,
//! `kill <job_id> [force]`, `ports <service_type>`.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::config::ServerConfig;
use crate::discovery::ServiceType;
use crate::job::JobState;

/// Error returned by a job body that stopped because a stop was requested.
#[derive(Debug)]
pub struct JobStopped;

impl fmt::Display for JobStopped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job stopped on request")
    }
}

impl std::error::Error for JobStopped {}

/// One control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Status,
    Stop {
        force: bool,
    },
    Jobs {
        crawl_id: Option<String>,
        state: Option<JobState>,
    },
    Kill {
        job_id: String,
        force: bool,
    },
    Ports {
        service_type: ServiceType,
    },
}

fn parse_force(word: Option<&str>) -> Result<bool> {
    match word {
        None => Ok(false),
        Some(w) if w.eq_ignore_ascii_case("force") => Ok(true),
        Some(w) => anyhow::bail!("expected 'force', got {w:?}"),
    }
}

fn dash_to_none(word: Option<&str>) -> Option<&str> {
    word.filter(|w| *w != "-")
}

impl FromStr for ControlCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            anyhow::bail!("empty command");
        };
        let cmd = match verb.to_ascii_lowercase().as_str() {
            "status" => ControlCommand::Status,
            "stop" => ControlCommand::Stop {
                force: parse_force(words.next())?,
            },
            "jobs" => ControlCommand::Jobs {
                crawl_id: dash_to_none(words.next()).map(str::to_string),
                state: dash_to_none(words.next())
                    .map(str::parse::<JobState>)
                    .transpose()?,
            },
            "kill" => {
                let job_id = words.next().context("kill needs a job id")?.to_string();
                ControlCommand::Kill {
                    job_id,
                    force: parse_force(words.next())?,
                }
            }
            "ports" => ControlCommand::Ports {
                service_type: words.next().context("ports needs a service type")?.parse()?,
            },
            other => anyhow::bail!("unknown command: {other}"),
        };
        if let Some(extra) = words.next() {
            anyhow::bail!("unexpected argument: {extra}");
        }
        Ok(cmd)
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let force = |force: bool| if force { " force" } else { "" };
        match self {
            ControlCommand::Status => write!(f, "status"),
            ControlCommand::Stop { force: fc } => write!(f, "stop{}", force(*fc)),
            ControlCommand::Jobs { crawl_id, state } => write!(
                f,
                "jobs {} {}",
                crawl_id.as_deref().unwrap_or("-"),
                state.map_or("-", |s| s.as_str())
            ),
            ControlCommand::Kill { job_id, force: fc } => write!(f, "kill {job_id}{}", force(*fc)),
            ControlCommand::Ports { service_type } => write!(f, "ports {service_type}"),
        }
    }
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlReply {
    pub fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self {
                ok: true,
                data,
                error: None,
            },
            Err(e) => Self::err(format!("serialize reply: {e}")),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: Value::Null,
            error: Some(msg.into()),
        }
    }
}

/// Reply payload of `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub running: bool,
    pub host: String,
    pub port: u16,
    pub started_at: Option<DateTime<Utc>>,
    pub jobs_total: usize,
    pub jobs_running: usize,
    pub proxies_available: usize,
    pub proxies_retired: usize,
}

/// Reply payload of `ports`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortsStatus {
    pub service_type: ServiceType,
    pub active: Vec<u16>,
    pub free: Vec<u16>,
}

/// Address of the control listener for `cfg`.
pub fn control_addr(cfg: &ServerConfig) -> String {
    format!("{}:{}", cfg.host, cfg.port)
}

/// Send one command to a running server and return the reply payload.
/// A reply with `ok: false` becomes an error carrying the server's message.
pub async fn send_command(addr: &str, cmd: &ControlCommand) -> Result<Value> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connect to control listener at {addr}"))?;
    let (read_half, mut write_half) = stream.into_split();
    write_half.write_all(format!("{cmd}\n").as_bytes()).await?;
    write_half.flush().await?;

    let mut lines = BufReader::new(read_half).lines();
    let line = lines
        .next_line()
        .await?
        .context("control listener closed without replying")?;
    let reply: ControlReply = serde_json::from_str(&line).context("malformed control reply")?;
    if !reply.ok {
        anyhow::bail!(
            "{}",
            reply.error.unwrap_or_else(|| "request failed".to_string())
        );
    }
    Ok(reply.data)
}
