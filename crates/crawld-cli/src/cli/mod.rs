//! CLI for the crawld fetch orchestration server.

mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use crawld_core::config;
use crawld_core::control::{control_addr, ControlCommand};
use crawld_core::discovery::ServiceType;
use crawld_core::job::JobState;

use commands::{
    run_completions, run_control, run_fetch, run_jobs, run_serve, run_status, FetchArgs,
};

/// Top-level CLI for crawld.
#[derive(Debug, Parser)]
#[command(name = "crawld")]
#[command(about = "crawld: crawler fetch orchestration server", long_about = None)]
pub struct Cli {
    /// Control address of a running server (default: from config).
    #[arg(long, global = true, value_name = "HOST:PORT")]
    pub addr: Option<String>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the crawl server in the foreground until stopped.
    Serve,

    /// Ask a running server to stop.
    Stop {
        /// Stop even if jobs are running.
        #[arg(long)]
        force: bool,
    },

    /// Show server status.
    Status,

    /// List jobs known to the server.
    Jobs {
        /// Only jobs of this crawl.
        #[arg(long)]
        crawl: Option<String>,
        /// Only jobs in this state (created, running, finished, failed, killed).
        #[arg(long)]
        state: Option<JobState>,
    },

    /// Stop a running job.
    Kill {
        /// Job identifier.
        id: String,
        /// Mark the stop request as forced on the job record.
        #[arg(long)]
        force: bool,
    },

    /// Show active and free ports of a service type.
    Ports {
        #[arg(default_value = "FetcherServer")]
        service_type: ServiceType,
    },

    /// Fetch one URL with the raw HTTP client and print the response.
    Fetch(FetchArgs),

    /// Print shell completions.
    Completions { shell: Shell },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        if let CliCommand::Completions { shell } = cli.command {
            run_completions(shell, &mut Cli::command());
            return Ok(());
        }

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let addr = cli.addr.unwrap_or_else(|| control_addr(&cfg.server));

        match cli.command {
            CliCommand::Serve => run_serve(cfg).await?,
            CliCommand::Stop { force } => run_control(&addr, ControlCommand::Stop { force }).await?,
            CliCommand::Status => run_status(&addr).await?,
            CliCommand::Jobs { crawl, state } => run_jobs(&addr, crawl, state).await?,
            CliCommand::Kill { id, force } => {
                run_control(&addr, ControlCommand::Kill { job_id: id, force }).await?
            }
            CliCommand::Ports { service_type } => {
                run_control(&addr, ControlCommand::Ports { service_type }).await?
            }
            CliCommand::Fetch(args) => run_fetch(&cfg, args).await?,
            CliCommand::Completions { .. } => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
