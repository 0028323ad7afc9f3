//! Integration tests: CrawlServer start/stop gating, discovery registration,
//! the control protocol and fetcher servers.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::canned_server::{closed_port, CannedServer};
use common::discovery::{CountingRegistry, UnreachableRegistry};
use crawld_core::conf::NewConf;
use crawld_core::config::CrawldConfig;
use crawld_core::control::{send_command, ControlCommand, ServerStatus};
use crawld_core::discovery::{ServiceRegistry, ServiceType};
use crawld_core::ports::PortAllocator;
use crawld_core::fetcher::fetcher_request;
use crawld_core::job::{JobConfig, JobInfo, JobState, JobType};
use crawld_core::scheduler::JobContext;
use crawld_core::server::{CrawlServer, ServerError};

fn test_config() -> CrawldConfig {
    let mut cfg = CrawldConfig::default();
    cfg.server.port = 0;
    let port = closed_port();
    cfg.ports.fetcher_base = port;
    cfg.ports.fetcher_max = port;
    cfg.http.timeout_ms = 2_000;
    cfg
}

async fn wait_for_state(server: &CrawlServer, id: &str, state: JobState) -> JobInfo {
    for _ in 0..300 {
        if let Some(info) = server.get_job(id) {
            if info.state == state {
                return info;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never reached {state}: {:?}", server.get_job(id));
}

async fn wait_for_free_ports(allocator: &PortAllocator) {
    for _ in 0..100 {
        if allocator.active_ports().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("ports still active: {:?}", allocator.active_ports());
}

/// Registers a PARSE handler that runs until stopped, gated on `started`.
fn register_blocking_job(server: &CrawlServer) -> Arc<AtomicBool> {
    let started = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&started);
    server.register_handler(JobType::Parse, move |ctx: &JobContext| -> anyhow::Result<()> {
        flag.store(true, Ordering::Release);
        loop {
            ctx.check_stop()?;
            std::thread::sleep(Duration::from_millis(5));
        }
    });
    started
}

#[tokio::test]
async fn start_is_idempotent_and_stop_unregisters_once() {
    let discovery = Arc::new(CountingRegistry::default());
    let server = CrawlServer::new(test_config(), discovery.clone()).unwrap();

    assert!(server.stop(false).await, "stopping a stopped server is a no-op");
    assert_eq!(discovery.unregister_count(), 0);

    let addr = server.start().await.unwrap();
    assert_eq!(server.start().await.unwrap(), addr);
    assert_eq!(discovery.register_count(), 1);
    let instances = discovery.instances();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].port, addr.port());
    assert_eq!(instances[0].service_type, ServiceType::CrawlServer);

    assert!(server.stop(false).await);
    assert!(server.stop(false).await);
    assert_eq!(discovery.unregister_count(), 1);
    assert!(discovery.instances().is_empty());
    server.wait_stopped().await;

    assert!(matches!(server.start().await, Err(ServerError::Closed)));
}

#[tokio::test]
async fn unreachable_discovery_fails_start() {
    let server = CrawlServer::new(test_config(), Arc::new(UnreachableRegistry)).unwrap();
    let err = server.start().await.unwrap_err();
    assert!(matches!(err, ServerError::Registration { .. }), "{err}");
    assert!(!server.is_running());
}

#[tokio::test]
async fn running_job_blocks_stop_unless_forced() {
    let discovery = Arc::new(CountingRegistry::default());
    let server = CrawlServer::new(test_config(), discovery.clone()).unwrap();
    server.start().await.unwrap();
    let started = register_blocking_job(&server);

    let id = server.submit(JobConfig::new(JobType::Parse, "default")).unwrap();
    wait_for_state(&server, &id, JobState::Running).await;
    assert!(started.load(Ordering::Acquire));

    assert!(!server.can_stop(false));
    assert!(server.can_stop(true));
    assert!(!server.stop(false).await);
    assert!(server.is_running());
    assert_eq!(discovery.unregister_count(), 0);

    assert!(server.stop(true).await);
    assert!(!server.is_running());
    assert_eq!(discovery.unregister_count(), 1);
    wait_for_state(&server, &id, JobState::Killed).await;
}

#[tokio::test]
async fn control_protocol_round_trip() {
    let discovery = Arc::new(CountingRegistry::default());
    let server = CrawlServer::new(test_config(), discovery.clone()).unwrap();
    let addr = server.start().await.unwrap().to_string();
    register_blocking_job(&server);
    let id = server
        .submit(JobConfig::new(JobType::Parse, "default").with_crawl_id("news"))
        .unwrap();
    wait_for_state(&server, &id, JobState::Running).await;

    let status: ServerStatus =
        serde_json::from_value(send_command(&addr, &ControlCommand::Status).await.unwrap()).unwrap();
    assert!(status.running);
    assert_eq!(status.jobs_running, 1);

    let jobs = send_command(
        &addr,
        &ControlCommand::Jobs {
            crawl_id: Some("news".to_string()),
            state: Some(JobState::Running),
        },
    )
    .await
    .unwrap();
    let jobs: Vec<JobInfo> = serde_json::from_value(jobs).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, id);

    let refused = send_command(&addr, &ControlCommand::Stop { force: false }).await.unwrap();
    assert_eq!(refused, serde_json::Value::Bool(false));

    let err = send_command(
        &addr,
        &ControlCommand::Kill {
            job_id: "missing".to_string(),
            force: false,
        },
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("job not found"));

    let killed = send_command(
        &addr,
        &ControlCommand::Kill {
            job_id: id.clone(),
            force: false,
        },
    )
    .await
    .unwrap();
    assert_eq!(killed, serde_json::Value::Bool(true));
    wait_for_state(&server, &id, JobState::Killed).await;

    let stopped = send_command(&addr, &ControlCommand::Stop { force: false }).await.unwrap();
    assert_eq!(stopped, serde_json::Value::Bool(true));
    server.wait_stopped().await;
    assert_eq!(discovery.unregister_count(), 1);
}

#[tokio::test]
async fn fetcher_server_serves_requests_and_releases_its_port() {
    let origin = CannedServer::start("HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nbody");
    let discovery = Arc::new(CountingRegistry::default());
    let server = CrawlServer::new(test_config(), discovery.clone()).unwrap();

    let launch = server.spawn_fetcher_server(Some("news"), "default").unwrap();
    let allocator = server.ports().get(ServiceType::FetcherServer).unwrap().clone();
    assert_eq!(allocator.active_ports(), vec![launch.port]);

    // only one port in range
    let err = server.spawn_fetcher_server(None, "default").unwrap_err();
    assert!(matches!(err, ServerError::PortExhausted(_)), "{err}");

    wait_for_state(&server, &launch.job_id, JobState::Running).await;
    let fetcher_addr = format!("127.0.0.1:{}", launch.port);
    let url = origin.url("/page");
    let mut reply = None;
    for _ in 0..50 {
        let addr = fetcher_addr.clone();
        let url = url.clone();
        match tokio::task::spawn_blocking(move || fetcher_request(&addr, &url)).await.unwrap() {
            Ok(r) => {
                reply = Some(r);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let (code, content) = reply.expect("fetcher server answered");
    assert_eq!(code, 200);
    assert_eq!(content, b"body");
    assert!(discovery
        .instances()
        .iter()
        .any(|i| i.service_type == ServiceType::FetcherServer && i.port == launch.port));

    assert!(server.stop_job(&launch.job_id, false).unwrap());
    let info = wait_for_state(&server, &launch.job_id, JobState::Killed).await;
    assert_eq!(info.result["fetched"], 1);

    wait_for_free_ports(&allocator).await;
    assert_eq!(allocator.free_ports(), vec![launch.port]);
    assert!(discovery.instances().is_empty());
}

#[tokio::test]
async fn rejected_fetcher_job_recycles_port() {
    let mut cfg = test_config();
    cfg.scheduler.queue_capacity = 1;
    let server = CrawlServer::new(cfg, Arc::new(CountingRegistry::default())).unwrap();
    register_blocking_job(&server);
    let blocker = server.submit(JobConfig::new(JobType::Parse, "default")).unwrap();

    let err = server.spawn_fetcher_server(None, "default").unwrap_err();
    assert!(matches!(err, ServerError::Scheduler(_)), "{err}");
    let allocator = server.ports().get(ServiceType::FetcherServer).unwrap();
    assert!(allocator.active_ports().is_empty());

    server.stop_job(&blocker, true).ok();
}

#[tokio::test]
async fn force_kill_keeps_job_running_until_body_returns() {
    let server = CrawlServer::new(test_config(), Arc::new(CountingRegistry::default())).unwrap();
    server.start().await.unwrap();
    let release = Arc::new(AtomicBool::new(false));
    let gate = Arc::clone(&release);
    server.register_handler(JobType::Parse, move |_: &JobContext| -> anyhow::Result<()> {
        // ignores the stop flag until released
        while !gate.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    });
    let id = server.submit(JobConfig::new(JobType::Parse, "default")).unwrap();
    wait_for_state(&server, &id, JobState::Running).await;

    assert!(server.stop_job(&id, true).unwrap());
    let info = server.get_job(&id).unwrap();
    assert_eq!(info.state, JobState::Running);
    assert_eq!(info.msg.as_deref(), Some("force kill requested"));
    assert!(!server.can_stop(false));
    assert!(!server.stop(false).await);
    assert!(server.is_running());

    release.store(true, Ordering::Release);
    let info = wait_for_state(&server, &id, JobState::Killed).await;
    assert!(info.finished_at.is_some());
    assert!(server.stop(false).await);
}

#[tokio::test]
async fn fetcher_failing_before_bind_releases_its_port() {
    let server = CrawlServer::new(test_config(), Arc::new(CountingRegistry::default())).unwrap();
    let conf_id = server
        .conf()
        .create(NewConf {
            conf_id: Some("bad-tls".to_string()),
            force: false,
            params: [("http.tls.protocols".to_string(), "SSLv3".to_string())].into(),
        })
        .unwrap();

    let launch = server.spawn_fetcher_server(None, &conf_id).unwrap();
    let info = wait_for_state(&server, &launch.job_id, JobState::Failed).await;
    assert!(info.msg.unwrap().contains("build fetch client"));

    let allocator = server.ports().get(ServiceType::FetcherServer).unwrap().clone();
    wait_for_free_ports(&allocator).await;
    let again = server.spawn_fetcher_server(None, "default").unwrap();
    assert_eq!(again.port, launch.port);
    wait_for_state(&server, &again.job_id, JobState::Running).await;
    assert!(server.stop_job(&again.job_id, false).unwrap());
    wait_for_state(&server, &again.job_id, JobState::Killed).await;
}

#[tokio::test]
async fn fetcher_bind_failure_releases_its_port() {
    let cfg = test_config();
    let taken = std::net::TcpListener::bind((cfg.server.host.as_str(), cfg.ports.fetcher_base))
        .expect("occupy the fetcher port");
    let discovery = Arc::new(CountingRegistry::default());
    let server = CrawlServer::new(cfg, discovery.clone()).unwrap();

    let launch = server.spawn_fetcher_server(None, "default").unwrap();
    let info = wait_for_state(&server, &launch.job_id, JobState::Failed).await;
    assert!(info.msg.unwrap().contains("bind fetcher server"));

    let allocator = server.ports().get(ServiceType::FetcherServer).unwrap().clone();
    wait_for_free_ports(&allocator).await;
    assert_eq!(allocator.free_ports(), vec![launch.port]);
    assert!(discovery.instances().is_empty());
    drop(taken);
}

#[tokio::test]
async fn fetcher_killed_while_queued_releases_its_port() {
    let mut cfg = test_config();
    cfg.scheduler.worker_count = 1;
    let server = CrawlServer::new(cfg, Arc::new(CountingRegistry::default())).unwrap();
    server.start().await.unwrap();
    register_blocking_job(&server);
    let blocker = server.submit(JobConfig::new(JobType::Parse, "default")).unwrap();
    wait_for_state(&server, &blocker, JobState::Running).await;

    let launch = server.spawn_fetcher_server(None, "default").unwrap();
    let allocator = server.ports().get(ServiceType::FetcherServer).unwrap().clone();
    assert_eq!(allocator.active_ports(), vec![launch.port]);

    assert!(server.stop(true).await);
    server.join().await;
    let info = wait_for_state(&server, &launch.job_id, JobState::Killed).await;
    assert_eq!(info.msg.as_deref(), Some("killed before start"));
    wait_for_state(&server, &blocker, JobState::Killed).await;
    assert!(allocator.active_ports().is_empty());
    assert_eq!(allocator.free_ports(), vec![launch.port]);
}
