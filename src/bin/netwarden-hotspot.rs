//! Shim binary that calls into the agent library's `hotspot_main`.
use std::process::ExitCode;

use clap::Parser as _;
use netwarden_agent::cli::HotspotCli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    netwarden_agent::hotspot_main(HotspotCli::parse()).await
}
