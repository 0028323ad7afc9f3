//! Per-job view handed to the job body.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::conf::Properties;
use crate::control::JobStopped;
use crate::job::{ArgMap, JobInfo, JobRegistry, JobType};

#[derive(Clone)]
pub struct JobContext {
    job_id: String,
    job_type: JobType,
    crawl_id: Option<String>,
    conf_id: String,
    args: ArgMap,
    conf: Properties,
    port: Option<u16>,
    stop: Arc<AtomicBool>,
    registry: Arc<JobRegistry>,
}

impl JobContext {
    pub(crate) fn new(
        info: JobInfo,
        conf: Properties,
        port: Option<u16>,
        stop: Arc<AtomicBool>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            job_id: info.id,
            job_type: info.job_type,
            crawl_id: info.crawl_id,
            conf_id: info.conf_id,
            args: info.args,
            conf,
            port,
            stop,
            registry,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn crawl_id(&self) -> Option<&str> {
        self.crawl_id.as_deref()
    }

    pub fn conf_id(&self) -> &str {
        &self.conf_id
    }

    pub fn args(&self) -> &ArgMap {
        &self.args
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    /// Integer argument; numeric strings are accepted too.
    pub fn arg_u64(&self, key: &str) -> Option<u64> {
        match self.args.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Snapshot of the job's configuration taken at submit time.
    pub fn conf(&self) -> &Properties {
        &self.conf
    }

    /// Port leased to this job at submit time, if any.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// `Err(JobStopped)` once a stop was requested.
    pub fn check_stop(&self) -> Result<(), JobStopped> {
        if self.is_stop_requested() {
            Err(JobStopped)
        } else {
            Ok(())
        }
    }

    /// Set a progress counter, visible in job listings.
    pub fn record(&self, key: &str, value: impl Into<Value>) {
        self.registry.record(&self.job_id, key, value.into());
    }

    pub fn increment(&self, key: &str, delta: i64) {
        self.registry.increment(&self.job_id, key, delta);
    }
}
