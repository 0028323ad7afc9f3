//! CLI command handlers, one file per command.

mod completions;
mod control;
pub(super) mod fetch;
mod serve;

pub use completions::run_completions;
pub use control::{run_control, run_jobs, run_status};
pub use fetch::{run_fetch, FetchArgs};
pub use serve::run_serve;
