//! Library entry for the netwarden binaries.
//!
//! Each binary is a thin shim calling one of the `*_main` functions here:
//! - `netwarden-probe`: one reachability check, exit code 0 or 2
//! - `netwarden-hotspot`: captive hotspot fallback until the device is online
//! - `netwarden-watchdog`: escalating remediation while the network stays down
//! - `netwarden-aliases`: mDNS alias reconciliation for the hostname
#![cfg_attr(
    test,
    expect(clippy::unwrap_used, reason = "Unwrapping is fine in tests")
)]

extern crate alloc;
extern crate core;

pub mod aliases;
pub mod cli;
pub mod config;
mod error;
pub mod hotspot;
pub mod probe;
#[cfg(test)]
mod testing;
pub mod watchdog;

pub use error::*;

use core::future::Future;
use std::process::ExitCode;

use eyre::WrapErr as _;
use netwarden_common::{Systemctl, is_superuser, is_systemd, logging, system_hostname};
use tracing::{Instrument as _, error, info, info_span, warn};

use aliases::{AliasReconciler, short_hostname, validate_hostname};
use cli::{AliasesCli, HotspotCli, ProbeCli, WatchdogCli};
use config::{NetwardenConfig, config_path, load_or_default};
use hotspot::{HotspotController, HotspotOwnership, SystemHotspot};
use probe::{Prober, SystemProbes};
use watchdog::Watchdog;

/// Exit code of `netwarden-probe` when nothing answered.
pub const UNREACHABLE_EXIT_CODE: u8 = 2;

/// Runs the reachability chain once and prints the outcome.
pub async fn probe_main(_invocation: ProbeCli) -> ExitCode {
    run("probe", |config| async move {
        let prober = Prober::new(system_probes(&config)?, &config.probe)?;
        let result = prober.probe().await;
        let observed_at = result.observed_at.to_rfc3339();
        match result.method {
            Some(method) => {
                println!("reachable via {method} at {observed_at}");
                Ok(ExitCode::SUCCESS)
            }
            None => {
                println!("unreachable at {observed_at}");
                Ok(ExitCode::from(UNREACHABLE_EXIT_CODE))
            }
        }
    })
    .await
}

/// Keeps the hotspot up until the device is online again.
pub async fn hotspot_main(invocation: HotspotCli) -> ExitCode {
    run("hotspot", move |config| async move {
        require_root()?;
        let prober = Prober::new(system_probes(&config)?, &config.probe)?;
        let platform = SystemHotspot::new(config.hotspot.clone());
        let mut controller =
            HotspotController::new(prober, Systemctl::default(), platform, config.hotspot)
                .with_preferred_interface(invocation.interface);

        let connected = controller.ensure_connectivity().await?;
        info!(
            method = %connected.method,
            hotspot_used = connected.hotspot_used,
            portal_rounds = connected.portal_rounds,
            "Device is online"
        );
        Ok(ExitCode::SUCCESS)
    })
    .await
}

/// Polls connectivity forever.
pub async fn watchdog_main(_invocation: WatchdogCli) -> ExitCode {
    run("watchdog", |config| async move {
        require_root()?;
        let prober = Prober::new(system_probes(&config)?, &config.probe)?;
        let ownership = HotspotOwnership::from_config(&config.hotspot);
        let watchdog = Watchdog::new(prober, Systemctl::default(), ownership, &config.watchdog)?;
        watchdog.run().await;
        Ok(ExitCode::SUCCESS)
    })
    .await
}

/// Reconciles the mDNS aliases for the given or the current hostname.
pub async fn aliases_main(invocation: AliasesCli) -> ExitCode {
    run("aliases", move |config| async move {
        let hostname = match invocation.hostname {
            Some(hostname) => hostname,
            None => short_hostname(&system_hostname()?).to_owned(),
        };
        validate_hostname(&hostname)?;
        require_root()?;

        let supervisor = Systemctl::new(config.aliases.unit_dir.clone());
        let report = AliasReconciler::new(supervisor, config.aliases)
            .reconcile(&hostname)
            .await?;
        info!(
            hostname,
            enabled = ?report.enabled,
            disabled = ?report.disabled,
            hosts_entry_added = report.hosts_entry_added,
            "Aliases reconciled"
        );
        if !report.failed.is_empty() {
            warn!(failed = ?report.failed, "Some aliases could not be updated");
        }
        Ok(ExitCode::SUCCESS)
    })
    .await
}

/// Loads the config, sets up logging and runs `body` in a span named after the component.
async fn run<F, Fut>(component: &'static str, body: F) -> ExitCode
where
    F: FnOnce(NetwardenConfig) -> Fut,
    Fut: Future<Output = Result<ExitCode, FatalError>>,
{
    let config = match setup().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e.chain());
            return ExitCode::from(e.exit_code());
        }
    };

    match body(config).instrument(info_span!("netwarden", component)).await {
        Ok(code) => code,
        Err(e) => {
            error!(component, "{}", e.chain());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn setup() -> Result<NetwardenConfig, FatalError> {
    let path = config_path();
    let config = load_or_default(&path).await?;
    logging::init(config.log.format, config.log.file.as_deref())
        .wrap_err("Failed to set up logging")?;
    Ok(config)
}

fn require_root() -> Result<(), FatalError> {
    if !is_superuser() {
        return Err(FatalError::NotRoot);
    }
    if !is_systemd() {
        warn!("systemd does not seem to be running, service transitions will fail");
    }
    Ok(())
}

fn system_probes(config: &NetwardenConfig) -> eyre::Result<SystemProbes> {
    SystemProbes::new(&config.probe).wrap_err("Failed to build HTTP client")
}
