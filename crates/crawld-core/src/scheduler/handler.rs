//! Job bodies and the type → handler table.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use super::JobContext;
use crate::job::JobType;

/// Body of a job. Runs on a blocking thread; should poll
/// `ctx.check_stop()` between units of work.
pub trait JobHandler: Send + Sync {
    fn run(&self, ctx: &JobContext) -> Result<()>;
}

impl<F> JobHandler for F
where
    F: Fn(&JobContext) -> Result<()> + Send + Sync,
{
    fn run(&self, ctx: &JobContext) -> Result<()> {
        self(ctx)
    }
}

/// Maps each job type to the handler that runs it.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `job_type`.
    pub fn register(&mut self, job_type: JobType, handler: impl JobHandler + 'static) {
        self.handlers.insert(job_type, Arc::new(handler));
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }
}
