pub mod config;
pub mod logging;

pub mod conf;
pub mod control;
pub mod discovery;
pub mod fetch;
pub mod fetcher;
pub mod job;
pub mod ports;
pub mod proxy;
pub mod retry;
pub mod scheduler;
pub mod server;
