//! Shim binary that calls into the agent library's `aliases_main`.
use std::process::ExitCode;

use clap::Parser as _;
use netwarden_agent::cli::AliasesCli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    netwarden_agent::aliases_main(AliasesCli::parse()).await
}
