//! Shim binary that calls into the agent library's `watchdog_main`.
use std::process::ExitCode;

use clap::Parser as _;
use netwarden_agent::cli::WatchdogCli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    netwarden_agent::watchdog_main(WatchdogCli::parse()).await
}
