//! Crawl server: the control plane that owns the scheduler, job registry,
//! port allocators and proxy pool, and gates shutdown on running jobs.
//!
//! All state belongs to one `CrawlServer` value; several independent
//! instances can live in the same process.

mod listener;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::conf::ConfManager;
use crate::config::CrawldConfig;
use crate::control::{PortsStatus, ServerStatus};
use crate::discovery::{ServerInstance, ServiceRegistry, ServiceType};
use crate::fetcher::{FetchJob, ARG_MODE, ARG_SERVER_PORT, MODE_SERVER};
use crate::job::{JobConfig, JobInfo, JobRegistry, JobState, JobType};
use crate::ports::{PortExhausted, PortRegistry, UnknownServiceType};
use crate::proxy::ProxyPool;
use crate::retry::RetryPolicy;
use crate::scheduler::{HandlerTable, JobHandler, JobScheduler, SchedulerError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("bind control listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("register {instance} with discovery: {reason}")]
    Registration { instance: String, reason: String },
    #[error("server was stopped and cannot be restarted")]
    Closed,
    #[error(transparent)]
    PortExhausted(#[from] PortExhausted),
    #[error(transparent)]
    UnknownServiceType(#[from] UnknownServiceType),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A FETCH job running a fetcher server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetcherLaunch {
    pub job_id: String,
    pub port: u16,
}

#[derive(Default)]
struct RunState {
    local_addr: Option<SocketAddr>,
    listener: Option<JoinHandle<()>>,
    started_at: Option<DateTime<Utc>>,
}

pub struct CrawlServer {
    config: CrawldConfig,
    confs: Arc<ConfManager>,
    registry: Arc<JobRegistry>,
    scheduler: JobScheduler,
    ports: Arc<PortRegistry>,
    proxies: Arc<ProxyPool>,
    discovery: Arc<dyn ServiceRegistry>,
    run: Mutex<RunState>,
    running: watch::Sender<bool>,
}

impl CrawlServer {
    /// Build a stopped server from `config`. Spawns the scheduler workers, so
    /// this must run inside a Tokio runtime. Loads the proxy list if one is
    /// configured.
    pub fn new(config: CrawldConfig, discovery: Arc<dyn ServiceRegistry>) -> anyhow::Result<Arc<Self>> {
        let proxies = match &config.http.proxy_list {
            Some(path) => ProxyPool::load_from_path(path)
                .with_context(|| format!("load proxy list {}", path.display()))?,
            None => ProxyPool::new(),
        };
        let proxies = Arc::new(proxies);
        let ports = Arc::new(PortRegistry::new().with_range(
            ServiceType::FetcherServer,
            config.ports.fetcher_base,
            config.ports.fetcher_max,
        ));
        let confs = Arc::new(ConfManager::new(config.http.to_properties()));
        let registry = Arc::new(JobRegistry::new());
        let retry = config
            .retry
            .as_ref()
            .map(RetryPolicy::from)
            .unwrap_or_default();

        let mut handlers = HandlerTable::new();
        handlers.register(
            JobType::Fetch,
            FetchJob::new(
                config.server.host.clone(),
                Arc::clone(&discovery),
                Arc::clone(&proxies),
                retry,
            ),
        );
        let scheduler = JobScheduler::new(
            &config.scheduler,
            Arc::clone(&registry),
            Arc::clone(&confs),
            handlers,
        );
        let (running, _) = watch::channel(false);

        Ok(Arc::new(Self {
            config,
            confs,
            registry,
            scheduler,
            ports,
            proxies,
            discovery,
            run: Mutex::new(RunState::default()),
            running,
        }))
    }

    /// Bind the control listener and announce the server to discovery.
    /// Calling it on a running server does nothing and returns the bound address.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, ServerError> {
        let mut run = self.run.lock().await;
        if let (true, Some(addr)) = (self.is_running(), run.local_addr) {
            tracing::info!("crawl server already running on {addr}");
            return Ok(addr);
        }
        if self.scheduler.is_closed() {
            return Err(ServerError::Closed);
        }

        let bind = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&bind).await.map_err(|source| ServerError::Bind {
            addr: bind.clone(),
            source,
        })?;
        let addr = listener.local_addr()?;

        let instance = self.instance(addr.port());
        if let Err(e) = self.discovery.register(&instance) {
            // the listener is dropped here, so nothing stays half up
            return Err(ServerError::Registration {
                instance: instance.to_string(),
                reason: format!("{e:#}"),
            });
        }

        run.listener = Some(listener::spawn(Arc::clone(self), listener));
        run.local_addr = Some(addr);
        run.started_at = Some(Utc::now());
        self.running.send_replace(true);
        tracing::info!("started crawl server on {addr}");
        Ok(addr)
    }

    /// True iff `force` or no job is RUNNING.
    pub fn can_stop(&self, force: bool) -> bool {
        force || self.registry.count_in_state(JobState::Running) == 0
    }

    /// Stop the server. Returns false (and changes nothing) when jobs are
    /// running and `force` is not set; true once stopped, including when it
    /// was not running.
    pub async fn stop(&self, force: bool) -> bool {
        let mut run = self.run.lock().await;
        if !self.is_running() {
            return true;
        }
        if !self.can_stop(force) {
            tracing::warn!("running jobs - can't stop now");
            return false;
        }

        if let Some(addr) = run.local_addr {
            let instance = self.instance(addr.port());
            if let Err(e) = self.discovery.unregister(&instance) {
                tracing::warn!("unregister {instance}: {e:#}");
            }
        }
        if let Some(task) = run.listener.take() {
            task.abort();
        }
        self.scheduler.close();
        if force {
            // running bodies see their stop flag; their records settle on their own
            for job in self.registry.list(None, Some(JobState::Running)) {
                let _ = self.registry.request_stop(&job.id, false);
            }
        }
        run.local_addr = None;
        self.running.send_replace(false);
        tracing::info!(force, "crawl server stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Resolve once the server is not running.
    pub async fn wait_stopped(&self) {
        let mut rx = self.running.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }

    /// Wait for the scheduler workers to exit after a stop. Running bodies
    /// finish first.
    pub async fn join(&self) {
        self.scheduler.join().await;
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.run.lock().await.local_addr
    }

    pub async fn status(&self) -> ServerStatus {
        let run = self.run.lock().await;
        ServerStatus {
            running: self.is_running(),
            host: self.config.server.host.clone(),
            port: run.local_addr.map_or(self.config.server.port, |a| a.port()),
            started_at: run.started_at,
            jobs_total: self.registry.len(),
            jobs_running: self.registry.count_in_state(JobState::Running),
            proxies_available: self.proxies.size(),
            proxies_retired: self.proxies.retired_size(),
        }
    }

    pub fn submit(&self, config: JobConfig) -> Result<String, SchedulerError> {
        self.scheduler.submit(config)
    }

    pub fn get_job(&self, id: &str) -> Option<JobInfo> {
        self.scheduler.get(id)
    }

    pub fn list_jobs(&self, crawl_id: Option<&str>, state: Option<JobState>) -> Vec<JobInfo> {
        self.scheduler.list(crawl_id, state)
    }

    pub fn stop_job(&self, id: &str, force: bool) -> Result<bool, SchedulerError> {
        self.scheduler.request_stop(id, force)
    }

    /// Start a fetcher server on a freshly allocated port as a FETCH job. The
    /// job owns the port lease from admission on, so the port goes back to the
    /// free set if the job is rejected, killed while queued, fails, or ends.
    pub fn spawn_fetcher_server(
        &self,
        crawl_id: Option<&str>,
        conf_id: &str,
    ) -> Result<FetcherLaunch, ServerError> {
        let lease = self.ports.get(ServiceType::FetcherServer)?.lease()?;
        let port = lease.port();
        let mut config = JobConfig::new(JobType::Fetch, conf_id)
            .with_arg(ARG_MODE, MODE_SERVER)
            .with_arg(ARG_SERVER_PORT, port);
        config.crawl_id = crawl_id.map(str::to_string);

        let job_id = self.scheduler.submit_with_port(config, lease)?;
        tracing::info!(job_id = %job_id, port, "fetcher server job submitted");
        Ok(FetcherLaunch { job_id, port })
    }

    pub fn ports_status(&self, service_type: ServiceType) -> Result<PortsStatus, UnknownServiceType> {
        let allocator = self.ports.get(service_type)?;
        Ok(PortsStatus {
            service_type,
            active: allocator.active_ports(),
            free: allocator.free_ports(),
        })
    }

    /// Register (or replace) the body for a job type.
    pub fn register_handler(&self, job_type: JobType, handler: impl JobHandler + 'static) {
        self.scheduler.register_handler(job_type, handler);
    }

    pub fn config(&self) -> &CrawldConfig {
        &self.config
    }

    pub fn conf(&self) -> &Arc<ConfManager> {
        &self.confs
    }

    pub fn ports(&self) -> &Arc<PortRegistry> {
        &self.ports
    }

    pub fn proxy_pool(&self) -> &Arc<ProxyPool> {
        &self.proxies
    }

    fn instance(&self, port: u16) -> ServerInstance {
        ServerInstance::new(
            Some(self.config.server.host.clone()),
            port,
            ServiceType::CrawlServer,
        )
    }
}
