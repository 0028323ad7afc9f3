//! Crawl job model: types, lifecycle states, configs and snapshots.

mod id;
mod registry;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use id::generate_job_id;
pub use registry::{JobNotFound, JobOutcome, JobRegistry};

/// Free-form job arguments and result counters.
pub type ArgMap = Map<String, Value>;

/// Kind of crawl step a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobType {
    Inject,
    Generate,
    Fetch,
    Parse,
    UpdateDb,
    Index,
    ReadDb,
    Class,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Inject => "INJECT",
            JobType::Generate => "GENERATE",
            JobType::Fetch => "FETCH",
            JobType::Parse => "PARSE",
            JobType::UpdateDb => "UPDATEDB",
            JobType::Index => "INDEX",
            JobType::ReadDb => "READDB",
            JobType::Class => "CLASS",
        }
    }

    pub const ALL: [JobType; 8] = [
        JobType::Inject,
        JobType::Generate,
        JobType::Fetch,
        JobType::Parse,
        JobType::UpdateDb,
        JobType::Index,
        JobType::ReadDb,
        JobType::Class,
    ];
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("unknown job type: {s}"))
    }
}

/// Job lifecycle. CREATED → RUNNING → one of FINISHED/FAILED/KILLED; a
/// queued job may also go straight to KILLED on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Created,
    Running,
    Finished,
    Failed,
    Killed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Created => "CREATED",
            JobState::Running => "RUNNING",
            JobState::Finished => "FINISHED",
            JobState::Failed => "FAILED",
            JobState::Killed => "KILLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed | JobState::Killed)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        match self {
            JobState::Created => matches!(next, JobState::Running | JobState::Killed),
            JobState::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        [
            JobState::Created,
            JobState::Running,
            JobState::Finished,
            JobState::Failed,
            JobState::Killed,
        ]
        .into_iter()
        .find(|st| st.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| anyhow::anyhow!("unknown job state: {s}"))
    }
}

/// Submission request for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub crawl_id: Option<String>,
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(default = "default_conf_id")]
    pub conf_id: String,
    #[serde(default)]
    pub args: ArgMap,
}

fn default_conf_id() -> String {
    crate::conf::DEFAULT_CONF.to_string()
}

impl JobConfig {
    pub fn new(job_type: JobType, conf_id: impl Into<String>) -> Self {
        Self {
            crawl_id: None,
            job_type,
            conf_id: conf_id.into(),
            args: ArgMap::new(),
        }
    }

    pub fn with_crawl_id(mut self, crawl_id: impl Into<String>) -> Self {
        self.crawl_id = Some(crawl_id.into());
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// Point-in-time snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub conf_id: String,
    pub crawl_id: Option<String>,
    pub args: ArgMap,
    pub state: JobState,
    /// Failure description or stop note.
    pub msg: Option<String>,
    /// Counters recorded by the job body.
    pub result: ArgMap,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
