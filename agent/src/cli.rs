//! Command-line parsers, one per binary.

use clap::Parser;

/// Checks network reachability once and prints the result.
#[derive(Debug, Parser)]
#[command(name = "netwarden-probe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
pub struct ProbeCli {}

/// Brings up a configuration hotspot until the device is back online.
#[derive(Debug, Parser)]
#[command(name = "netwarden-hotspot")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
pub struct HotspotCli {
    /// Wireless interface to host the access point on. Defaults to the first one found.
    pub interface: Option<String>,
}

/// Watches connectivity and restarts networking or reboots when it stays down.
#[derive(Debug, Parser)]
#[command(name = "netwarden-watchdog")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
pub struct WatchdogCli {}

/// Publishes the mDNS aliases for the device hostname.
#[derive(Debug, Parser)]
#[command(name = "netwarden-aliases")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
pub struct AliasesCli {
    /// Hostname to reconcile for. Defaults to the current system hostname.
    pub hostname: Option<String>,
}
