//! Commands that talk to a running server over the control listener.

use anyhow::Result;
use crawld_core::control::{send_command, ControlCommand, ServerStatus};
use crawld_core::job::{JobInfo, JobState};

/// Send `cmd` and print the reply payload as JSON.
pub async fn run_control(addr: &str, cmd: ControlCommand) -> Result<()> {
    let data = send_command(addr, &cmd).await?;
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

pub async fn run_status(addr: &str) -> Result<()> {
    let data = send_command(addr, &ControlCommand::Status).await?;
    let status: ServerStatus = serde_json::from_value(data)?;
    println!("running:  {}", status.running);
    println!("address:  {}:{}", status.host, status.port);
    if let Some(started) = status.started_at {
        println!("started:  {}", started.to_rfc3339());
    }
    println!("jobs:     {} ({} running)", status.jobs_total, status.jobs_running);
    println!(
        "proxies:  {} available, {} retired",
        status.proxies_available, status.proxies_retired
    );
    Ok(())
}

pub async fn run_jobs(addr: &str, crawl_id: Option<String>, state: Option<JobState>) -> Result<()> {
    let data = send_command(addr, &ControlCommand::Jobs { crawl_id, state }).await?;
    let jobs: Vec<JobInfo> = serde_json::from_value(data)?;
    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }
    println!("{:<40} {:<9} {:<10} {}", "ID", "TYPE", "STATE", "MSG");
    for j in jobs {
        println!(
            "{:<40} {:<9} {:<10} {}",
            j.id,
            j.job_type.to_string(),
            j.state.to_string(),
            j.msg.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
