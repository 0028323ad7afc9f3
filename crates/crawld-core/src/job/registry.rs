//! In-memory job table: the single source of truth for job state.
//!
//! All transitions go through here and are validated against
//! `JobState::can_transition_to`, so a job observed in a terminal state
//! never changes again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde_json::Value;

use super::{generate_job_id, ArgMap, JobConfig, JobInfo, JobState};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job not found: {0}")]
pub struct JobNotFound(pub String);

/// How a job body ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Finished,
    Failed(String),
    Killed,
}

impl JobOutcome {
    fn state(&self) -> JobState {
        match self {
            JobOutcome::Finished => JobState::Finished,
            JobOutcome::Failed(_) => JobState::Failed,
            JobOutcome::Killed => JobState::Killed,
        }
    }
}

struct JobEntry {
    info: JobInfo,
    stop: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobEntry>>,
    sequence: AtomicU64,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new job in CREATED and return its snapshot.
    pub fn create(&self, config: JobConfig) -> JobInfo {
        let mut jobs = self.write();
        let id = loop {
            let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            let id = generate_job_id(&config, seq);
            if !jobs.contains_key(&id) {
                break id;
            }
        };
        let info = JobInfo {
            id: id.clone(),
            job_type: config.job_type,
            conf_id: config.conf_id,
            crawl_id: config.crawl_id,
            args: config.args,
            state: JobState::Created,
            msg: None,
            result: ArgMap::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        jobs.insert(
            id,
            JobEntry {
                info: info.clone(),
                stop: Arc::new(AtomicBool::new(false)),
            },
        );
        info
    }

    pub fn get(&self, id: &str) -> Option<JobInfo> {
        self.read().get(id).map(|e| e.info.clone())
    }

    /// Jobs matching the optional filters, oldest first.
    pub fn list(&self, crawl_id: Option<&str>, state: Option<JobState>) -> Vec<JobInfo> {
        let mut out: Vec<JobInfo> = self
            .read()
            .values()
            .filter(|e| crawl_id.map_or(true, |c| e.info.crawl_id.as_deref() == Some(c)))
            .filter(|e| state.map_or(true, |s| e.info.state == s))
            .map(|e| e.info.clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub fn count_in_state(&self, state: JobState) -> usize {
        self.read().values().filter(|e| e.info.state == state).count()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// CREATED → RUNNING. Returns the snapshot and the stop flag, or `None`
    /// when the job is unknown or no longer CREATED.
    pub fn mark_running(&self, id: &str) -> Option<(JobInfo, Arc<AtomicBool>)> {
        let mut jobs = self.write();
        let entry = jobs.get_mut(id)?;
        if !entry.info.state.can_transition_to(JobState::Running) {
            return None;
        }
        entry.info.state = JobState::Running;
        entry.info.started_at = Some(Utc::now());
        Some((entry.info.clone(), Arc::clone(&entry.stop)))
    }

    /// Move a RUNNING job to its terminal state. A job that is already
    /// terminal keeps its state; the final state is returned.
    pub fn complete(&self, id: &str, outcome: JobOutcome) -> Option<JobState> {
        let mut jobs = self.write();
        let entry = jobs.get_mut(id)?;
        let next = outcome.state();
        if entry.info.state.can_transition_to(next) {
            entry.info.state = next;
            entry.info.finished_at = Some(Utc::now());
            if let JobOutcome::Failed(msg) = outcome {
                entry.info.msg = Some(msg);
            }
        }
        Some(entry.info.state)
    }

    /// CREATED → KILLED for a job that never started.
    pub fn kill_pending(&self, id: &str) -> bool {
        let mut jobs = self.write();
        let Some(entry) = jobs.get_mut(id) else {
            return false;
        };
        if entry.info.state != JobState::Created {
            return false;
        }
        entry.info.state = JobState::Killed;
        entry.info.msg = Some("killed before start".to_string());
        entry.info.finished_at = Some(Utc::now());
        true
    }

    /// Ask a RUNNING job to stop. Returns `Ok(false)` when the job is not
    /// running. The record stays RUNNING until the worker completes it;
    /// `force` only notes the request in `msg`.
    pub fn request_stop(&self, id: &str, force: bool) -> Result<bool, JobNotFound> {
        let mut jobs = self.write();
        let entry = jobs.get_mut(id).ok_or_else(|| JobNotFound(id.to_string()))?;
        if entry.info.state != JobState::Running {
            return Ok(false);
        }
        entry.stop.store(true, Ordering::Release);
        if force {
            entry.info.msg = Some("force kill requested".to_string());
        }
        Ok(true)
    }

    pub fn is_stop_requested(&self, id: &str) -> bool {
        self.read()
            .get(id)
            .is_some_and(|e| e.stop.load(Ordering::Acquire))
    }

    /// Set a result counter.
    pub fn record(&self, id: &str, key: &str, value: Value) {
        if let Some(entry) = self.write().get_mut(id) {
            entry.info.result.insert(key.to_string(), value);
        }
    }

    /// Add `delta` to an integer result counter (missing counts as 0).
    pub fn increment(&self, id: &str, key: &str, delta: i64) {
        if let Some(entry) = self.write().get_mut(id) {
            let current = entry.info.result.get(key).and_then(Value::as_i64).unwrap_or(0);
            entry
                .info
                .result
                .insert(key.to_string(), Value::from(current + delta));
        }
    }

    /// Drop a job that never reached a worker.
    pub(crate) fn discard(&self, id: &str) {
        self.write().remove(id);
    }

    /// Remove terminal jobs; returns how many were dropped.
    pub fn evict_terminal(&self) -> usize {
        let mut jobs = self.write();
        let before = jobs.len();
        jobs.retain(|_, e| !e.info.state.is_terminal());
        before - jobs.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobType;

    fn fetch_job(reg: &JobRegistry, crawl: &str) -> String {
        reg.create(JobConfig::new(JobType::Fetch, "default").with_crawl_id(crawl))
            .id
    }

    #[test]
    fn lifecycle_is_monotonic() {
        let reg = JobRegistry::new();
        let id = fetch_job(&reg, "c");
        assert_eq!(reg.get(&id).unwrap().state, JobState::Created);
        assert!(reg.mark_running(&id).is_some());
        assert!(reg.mark_running(&id).is_none());
        assert_eq!(
            reg.complete(&id, JobOutcome::Failed("boom".to_string())),
            Some(JobState::Failed)
        );
        assert_eq!(reg.complete(&id, JobOutcome::Finished), Some(JobState::Failed));
        let info = reg.get(&id).unwrap();
        assert_eq!(info.msg.as_deref(), Some("boom"));
        assert!(info.finished_at.is_some());
        assert!(!reg.kill_pending(&id));
    }

    #[test]
    fn stop_requests() {
        let reg = JobRegistry::new();
        assert_eq!(reg.request_stop("nope", false), Err(JobNotFound("nope".to_string())));

        let id = fetch_job(&reg, "c");
        assert_eq!(reg.request_stop(&id, false), Ok(false));
        let (_, flag) = reg.mark_running(&id).unwrap();
        assert_eq!(reg.request_stop(&id, false), Ok(true));
        assert!(flag.load(Ordering::Acquire));
        assert_eq!(reg.get(&id).unwrap().state, JobState::Running);

        assert_eq!(reg.request_stop(&id, true), Ok(true));
        let info = reg.get(&id).unwrap();
        assert_eq!(info.state, JobState::Running, "only the worker ends a job");
        assert_eq!(info.msg.as_deref(), Some("force kill requested"));
        assert_eq!(reg.count_in_state(JobState::Running), 1);
        assert_eq!(reg.complete(&id, JobOutcome::Killed), Some(JobState::Killed));
        assert_eq!(reg.complete(&id, JobOutcome::Finished), Some(JobState::Killed));
    }

    #[test]
    fn list_filters_by_crawl_and_state() {
        let reg = JobRegistry::new();
        let a = fetch_job(&reg, "a");
        let _b = fetch_job(&reg, "b");
        reg.mark_running(&a);
        assert_eq!(reg.list(None, None).len(), 2);
        assert_eq!(reg.list(Some("a"), None).len(), 1);
        assert_eq!(reg.list(None, Some(JobState::Running))[0].id, a);
        assert!(reg.list(Some("b"), Some(JobState::Running)).is_empty());
        assert_eq!(reg.count_in_state(JobState::Created), 1);
    }

    #[test]
    fn counters() {
        let reg = JobRegistry::new();
        let id = fetch_job(&reg, "c");
        reg.increment(&id, "fetched", 2);
        reg.increment(&id, "fetched", 3);
        reg.record(&id, "port", Value::from(21000));
        let result = reg.get(&id).unwrap().result;
        assert_eq!(result["fetched"], 5);
        assert_eq!(result["port"], 21000);
    }

    #[test]
    fn identical_configs_get_distinct_ids() {
        let reg = JobRegistry::new();
        let a = fetch_job(&reg, "c");
        let b = fetch_job(&reg, "c");
        assert_ne!(a, b);
        assert_eq!(reg.len(), 2);
        reg.kill_pending(&a);
        assert_eq!(reg.evict_terminal(), 1);
        assert!(reg.get(&a).is_none());
    }
}
