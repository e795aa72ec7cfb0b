//! Shim binary that calls into the agent library's `probe_main`.
use std::process::ExitCode;

use clap::Parser as _;
use netwarden_agent::cli::ProbeCli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    netwarden_agent::probe_main(ProbeCli::parse()).await
}
