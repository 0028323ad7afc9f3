//! `crawld serve` – run the crawl server until stopped.
//!
//! The first ctrl-c stops the server only if no job is running; a second
//! one forces the stop. A remote `stop` ends the process as well.

use std::sync::Arc;

use anyhow::Result;
use crawld_core::config::CrawldConfig;
use crawld_core::discovery::LocalServiceRegistry;
use crawld_core::server::CrawlServer;

pub async fn run_serve(cfg: CrawldConfig) -> Result<()> {
    let server = CrawlServer::new(cfg, Arc::new(LocalServiceRegistry::new()))?;
    let addr = server.start().await?;
    println!("crawld listening on {addr}");

    let mut interrupts = 0u32;
    loop {
        tokio::select! {
            _ = server.wait_stopped() => break,
            signal = tokio::signal::ctrl_c() => {
                signal?;
                interrupts += 1;
                if server.stop(interrupts > 1).await {
                    break;
                }
                eprintln!("jobs are still running; press ctrl-c again to force stop");
            }
        }
    }

    server.join().await;
    println!("crawld stopped");
    Ok(())
}
