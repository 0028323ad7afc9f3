//! Job scheduler.
//!
//! Admits jobs up to a fixed capacity (queued plus running), hands them to a
//! fixed pool of workers, and records every state change in the
//! `JobRegistry`. Submission never blocks: a full scheduler rejects at once.

mod context;
mod handler;
mod pool;

pub use context::JobContext;
pub use handler::{HandlerTable, JobHandler};
pub use pool::JobScheduler;

use crate::job::JobType;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("job queue is full ({capacity} jobs admitted)")]
    QueueFull { capacity: usize },
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error("unknown configuration id <{0}>")]
    ConfNotFound(String),
    #[error("no handler registered for {0} jobs")]
    NoHandler(JobType),
    #[error("scheduler is closed")]
    Closed,
}
