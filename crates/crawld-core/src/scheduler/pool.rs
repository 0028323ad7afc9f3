//! Bounded worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use super::{HandlerTable, JobContext, JobHandler, SchedulerError};
use crate::conf::{ConfManager, Properties};
use crate::config::SchedulerConfig;
use crate::control::JobStopped;
use crate::job::{JobConfig, JobInfo, JobOutcome, JobRegistry, JobState, JobType};
use crate::ports::PortLease;

/// Admitted job waiting for a worker. The permit and the port lease are
/// held until the job reaches a terminal state; dropping a job that never
/// ran releases both.
struct QueuedJob {
    id: String,
    handler: Arc<dyn JobHandler>,
    conf: Properties,
    port: Option<PortLease>,
    _permit: OwnedSemaphorePermit,
}

pub struct JobScheduler {
    registry: Arc<JobRegistry>,
    confs: Arc<ConfManager>,
    handlers: RwLock<HandlerTable>,
    admission: Arc<Semaphore>,
    capacity: usize,
    queue: Mutex<Option<mpsc::Sender<QueuedJob>>>,
    closing: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Create the scheduler and spawn its workers. Must be called from within
    /// a Tokio runtime.
    pub fn new(
        cfg: &SchedulerConfig,
        registry: Arc<JobRegistry>,
        confs: Arc<ConfManager>,
        handlers: HandlerTable,
    ) -> Self {
        let capacity = cfg.queue_capacity.max(1);
        let worker_count = cfg.worker_count.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let closing = Arc::new(AtomicBool::new(false));

        let workers = (0..worker_count)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&rx),
                    Arc::clone(&registry),
                    Arc::clone(&closing),
                ))
            })
            .collect();
        tracing::info!(worker_count, capacity, "job scheduler started");

        Self {
            registry,
            confs,
            handlers: RwLock::new(handlers),
            admission: Arc::new(Semaphore::new(capacity)),
            capacity,
            queue: Mutex::new(Some(tx)),
            closing,
            workers: Mutex::new(workers),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs admitted and not yet terminal.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.admission.available_permits()
    }

    pub fn register_handler(&self, job_type: JobType, handler: impl JobHandler + 'static) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .register(job_type, handler);
    }

    /// Admit a job. Fails immediately when the scheduler is full or closed,
    /// when no handler exists for the job type, or when the conf id is unknown.
    pub fn submit(&self, config: JobConfig) -> Result<String, SchedulerError> {
        self.admit(config, None)
    }

    /// Admit a job that owns `port` for its whole life. The port is recycled
    /// when the job is rejected, killed before it runs, or ends.
    pub fn submit_with_port(
        &self,
        config: JobConfig,
        port: PortLease,
    ) -> Result<String, SchedulerError> {
        self.admit(config, Some(port))
    }

    fn admit(&self, config: JobConfig, port: Option<PortLease>) -> Result<String, SchedulerError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(SchedulerError::Closed);
        }
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(config.job_type)
            .ok_or(SchedulerError::NoHandler(config.job_type))?;
        let conf = self
            .confs
            .get(Some(&config.conf_id))
            .map_err(|_| SchedulerError::ConfNotFound(config.conf_id.clone()))?;
        let permit = Arc::clone(&self.admission)
            .try_acquire_owned()
            .map_err(|_| SchedulerError::QueueFull {
                capacity: self.capacity,
            })?;

        let sender = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(SchedulerError::Closed)?;
        let info = self.registry.create(config);
        let id = info.id.clone();
        let job = QueuedJob {
            id: id.clone(),
            handler,
            conf,
            port,
            _permit: permit,
        };
        match sender.try_send(job) {
            Ok(()) => {
                tracing::info!(job_id = %id, job_type = %info.job_type, "job accepted");
                Ok(id)
            }
            Err(TrySendError::Full(_)) => {
                self.registry.discard(&id);
                Err(SchedulerError::QueueFull {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => {
                self.registry.discard(&id);
                Err(SchedulerError::Closed)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<JobInfo> {
        self.registry.get(id)
    }

    pub fn list(&self, crawl_id: Option<&str>, state: Option<JobState>) -> Vec<JobInfo> {
        self.registry.list(crawl_id, state)
    }

    /// Ask a running job to stop; see `JobRegistry::request_stop`.
    pub fn request_stop(&self, id: &str, force: bool) -> Result<bool, SchedulerError> {
        let accepted = self
            .registry
            .request_stop(id, force)
            .map_err(|e| SchedulerError::JobNotFound(e.0))?;
        if accepted {
            tracing::info!(job_id = id, force, "stop requested");
        }
        Ok(accepted)
    }

    /// Stop accepting work. Jobs still queued are marked KILLED; running
    /// jobs are left to finish. Workers exit once the queue drains.
    pub fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.admission.close();
        tracing::info!("job scheduler closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Wait for all workers to exit (after `close`).
    pub async fn join(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for w in workers {
            if let Err(e) = w.await {
                tracing::warn!("scheduler worker join: {e}");
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedJob>>>,
    registry: Arc<JobRegistry>,
    closing: Arc<AtomicBool>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(job) = next else {
            break;
        };
        if closing.load(Ordering::Acquire) {
            // release the permit and port before the record turns terminal
            let id = job.id.clone();
            drop(job);
            if registry.kill_pending(&id) {
                tracing::info!(job_id = %id, "queued job killed on shutdown");
            }
            continue;
        }
        run_job(&registry, job).await;
    }
    tracing::debug!(worker, "scheduler worker exiting");
}

async fn run_job(registry: &Arc<JobRegistry>, job: QueuedJob) {
    let QueuedJob {
        id,
        handler,
        conf,
        port,
        _permit,
    } = job;
    let Some((info, stop)) = registry.mark_running(&id) else {
        return;
    };
    let job_type = info.job_type;
    tracing::info!(job_id = %id, %job_type, "job started");

    let port_number = port.as_ref().map(PortLease::port);
    let ctx = JobContext::new(info, conf, port_number, stop, Arc::clone(registry));
    let joined = tokio::task::spawn_blocking(move || {
        let res = handler.run(&ctx);
        (res, ctx.is_stop_requested())
    })
    .await;

    let outcome = match joined {
        Ok((Ok(()), false)) => JobOutcome::Finished,
        Ok((Ok(()), true)) => JobOutcome::Killed,
        Ok((Err(e), _)) if e.downcast_ref::<JobStopped>().is_some() => JobOutcome::Killed,
        Ok((Err(e), _)) => JobOutcome::Failed(format!("{e:#}")),
        Err(e) => JobOutcome::Failed(format!("job panicked: {e}")),
    };
    if let JobOutcome::Failed(msg) = &outcome {
        tracing::warn!(job_id = %id, %job_type, "job failed: {msg}");
    }
    if let Some(lease) = port {
        tracing::debug!(
            job_id = %id,
            service = %lease.service_type(),
            port = lease.port(),
            "releasing job port"
        );
        drop(lease);
    }
    let state = registry.complete(&id, outcome);
    tracing::info!(job_id = %id, %job_type, state = ?state, "job ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn scheduler(workers: usize, capacity: usize, handlers: HandlerTable) -> JobScheduler {
        let cfg = SchedulerConfig {
            worker_count: workers,
            queue_capacity: capacity,
        };
        JobScheduler::new(
            &cfg,
            Arc::new(JobRegistry::new()),
            Arc::new(ConfManager::new(Properties::new())),
            handlers,
        )
    }

    async fn wait_for_state(s: &JobScheduler, id: &str, state: JobState) -> JobInfo {
        for _ in 0..200 {
            if let Some(info) = s.get(id) {
                if info.state == state {
                    return info;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached {state}: {:?}", s.get(id));
    }

    #[tokio::test]
    async fn outcomes_are_recorded() {
        let mut handlers = HandlerTable::new();
        handlers.register(JobType::Inject, |_: &JobContext| -> anyhow::Result<()> { Ok(()) });
        handlers.register(JobType::Parse, |_: &JobContext| -> anyhow::Result<()> {
            Err(anyhow::anyhow!("disk full").context("writing page"))
        });
        handlers.register(JobType::Index, |_: &JobContext| -> anyhow::Result<()> {
            panic!("index blew up")
        });
        let s = scheduler(2, 10, handlers);

        let ok = s.submit(JobConfig::new(JobType::Inject, "default")).unwrap();
        let bad = s.submit(JobConfig::new(JobType::Parse, "default")).unwrap();
        let boom = s.submit(JobConfig::new(JobType::Index, "default")).unwrap();

        wait_for_state(&s, &ok, JobState::Finished).await;
        let failed = wait_for_state(&s, &bad, JobState::Failed).await;
        assert_eq!(failed.msg.as_deref(), Some("writing page: disk full"));
        let panicked = wait_for_state(&s, &boom, JobState::Failed).await;
        assert!(panicked.msg.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn submit_validates_handler_and_conf() {
        let mut handlers = HandlerTable::new();
        handlers.register(JobType::Fetch, |_: &JobContext| -> anyhow::Result<()> { Ok(()) });
        let s = scheduler(1, 4, handlers);
        assert!(matches!(
            s.submit(JobConfig::new(JobType::Generate, "default")),
            Err(SchedulerError::NoHandler(JobType::Generate))
        ));
        assert!(matches!(
            s.submit(JobConfig::new(JobType::Fetch, "missing")),
            Err(SchedulerError::ConfNotFound(_))
        ));
        assert!(s.list(None, None).is_empty());
    }

    #[tokio::test]
    async fn cooperative_stop_kills_job() {
        let mut handlers = HandlerTable::new();
        handlers.register(JobType::Fetch, |ctx: &JobContext| -> anyhow::Result<()> {
            loop {
                ctx.check_stop()?;
                std::thread::sleep(Duration::from_millis(5));
            }
        });
        let s = scheduler(1, 4, handlers);
        let id = s.submit(JobConfig::new(JobType::Fetch, "default")).unwrap();
        wait_for_state(&s, &id, JobState::Running).await;
        assert!(s.request_stop(&id, false).unwrap());
        wait_for_state(&s, &id, JobState::Killed).await;
        assert!(!s.request_stop(&id, false).unwrap());
        assert!(matches!(
            s.request_stop("nope", false),
            Err(SchedulerError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn port_lease_lives_as_long_as_the_job() {
        use crate::discovery::ServiceType;
        use crate::ports::PortAllocator;

        let mut handlers = HandlerTable::new();
        handlers.register(JobType::Fetch, |ctx: &JobContext| -> anyhow::Result<()> {
            anyhow::ensure!(ctx.port() == Some(61000), "wrong port {:?}", ctx.port());
            anyhow::bail!("listener failed")
        });
        let s = scheduler(1, 1, handlers);
        let ports = Arc::new(PortAllocator::new(ServiceType::FetcherServer, 61000, 61000));

        let id = s
            .submit_with_port(JobConfig::new(JobType::Fetch, "default"), ports.lease().unwrap())
            .unwrap();
        let failed = wait_for_state(&s, &id, JobState::Failed).await;
        assert_eq!(failed.msg.as_deref(), Some("listener failed"));
        assert_eq!(ports.free_ports(), vec![61000]);

        s.close();
        let lease = ports.lease().unwrap();
        let rejected = s.submit_with_port(JobConfig::new(JobType::Fetch, "default"), lease);
        assert!(matches!(rejected, Err(SchedulerError::Closed)));
        assert!(ports.active_ports().is_empty());
    }

    #[tokio::test]
    async fn close_kills_queued_jobs_and_rejects_new_ones() {
        let release = Arc::new(AtomicBool::new(false));
        let gate = Arc::clone(&release);
        let mut handlers = HandlerTable::new();
        handlers.register(JobType::Fetch, move |_: &JobContext| -> anyhow::Result<()> {
            while !gate.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        });
        let s = scheduler(1, 4, handlers);
        let running = s.submit(JobConfig::new(JobType::Fetch, "default")).unwrap();
        wait_for_state(&s, &running, JobState::Running).await;
        let queued = s.submit(JobConfig::new(JobType::Fetch, "default")).unwrap();

        s.close();
        assert!(matches!(
            s.submit(JobConfig::new(JobType::Fetch, "default")),
            Err(SchedulerError::Closed)
        ));
        release.store(true, Ordering::Release);
        wait_for_state(&s, &running, JobState::Finished).await;
        wait_for_state(&s, &queued, JobState::Killed).await;
        s.join().await;
    }
}
