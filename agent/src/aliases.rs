//! mDNS alias reconciler.
//!
//! Every device answers to its hostname, a hyphen-free variant of it and a
//! fixed fallback alias, each published by one instance of a template unit.
//! [`AliasReconciler::reconcile`] brings the enabled instances in line with
//! that set and can be rerun at any time.

use alloc::collections::BTreeSet;
use std::{
    io,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use netwarden_common::{ServiceSupervisor, SupervisorError, UnitAction};
use regex::{Regex, RegexBuilder};
use thiserror::Error as ThisError;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::AliasConfig;

const HOSTS_ADDRESS: &str = "127.0.1.1";

#[expect(clippy::unwrap_used, reason = "The pattern is a constant")]
static HOSTNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$")
        .case_insensitive(true)
        .build()
        .unwrap()
});

#[derive(Debug, ThisError)]
pub enum AliasError {
    #[error("Invalid hostname {0:?}: expected 1 to 63 letters, digits or hyphens, not starting or ending with a hyphen")]
    InvalidHostname(String),
    #[error("Failed to determine the enabled aliases")]
    ActiveSet(#[from] SupervisorError),
    #[error("Failed to update hosts file {path:?}")]
    HostsFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Checks `hostname` is a single RFC 1123 label.
///
/// # Errors
///
/// Returns [`AliasError::InvalidHostname`] otherwise.
pub fn validate_hostname(hostname: &str) -> Result<(), AliasError> {
    if HOSTNAME_RE.is_match(hostname) {
        Ok(())
    } else {
        Err(AliasError::InvalidHostname(hostname.to_owned()))
    }
}

/// The first label of `name`, so `feeder.lan` becomes `feeder`.
#[must_use]
pub fn short_hostname(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// The aliases the device should answer to with `hostname`.
#[must_use]
pub fn desired_aliases(hostname: &str, config: &AliasConfig) -> BTreeSet<String> {
    let stripped: String = hostname.chars().filter(|&c| c != '-' && c != '_').collect();
    [hostname, stripped.as_str(), config.fallback.as_str()]
        .into_iter()
        .filter(|name| !name.is_empty())
        .map(|name| format!("{name}.{}", config.domain).to_lowercase())
        .collect()
}

/// What a reconciliation run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
    /// Aliases whose unit transitions failed.
    pub failed: Vec<String>,
    pub hosts_entry_added: bool,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.enabled.is_empty()
            && self.disabled.is_empty()
            && self.failed.is_empty()
            && !self.hosts_entry_added
    }
}

pub struct AliasReconciler<S> {
    supervisor: S,
    config: AliasConfig,
}

impl<S: ServiceSupervisor> AliasReconciler<S> {
    pub const fn new(supervisor: S, config: AliasConfig) -> Self {
        Self { supervisor, config }
    }

    /// Enables the aliases `hostname` calls for and disables all others.
    ///
    /// Failing unit transitions are logged and reported, the remaining aliases
    /// are still handled.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid hostname, if the enabled aliases cannot
    /// be listed, or if the hosts file cannot be updated.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, hostname: &str) -> Result<ReconcileReport, AliasError> {
        validate_hostname(hostname)?;

        let desired = desired_aliases(hostname, &self.config);
        let active = self
            .supervisor
            .enabled_instances(&self.config.unit_template)
            .await?;
        debug!(?desired, ?active, "Alias sets");

        let mut report = ReconcileReport::default();
        for alias in desired.difference(&active) {
            if self
                .transition(alias, [UnitAction::Enable, UnitAction::Restart])
                .await
            {
                info!(alias, "Enabled alias");
                report.enabled.push(alias.clone());
            } else {
                report.failed.push(alias.clone());
            }
        }
        for alias in active.difference(&desired) {
            if self
                .transition(alias, [UnitAction::Disable, UnitAction::Stop])
                .await
            {
                info!(alias, "Disabled alias");
                report.disabled.push(alias.clone());
            } else {
                report.failed.push(alias.clone());
            }
        }

        report.hosts_entry_added = ensure_hosts_entry(&self.config.hosts_file, hostname)
            .await
            .map_err(|source| AliasError::HostsFile {
                path: self.config.hosts_file.clone(),
                source,
            })?;

        if report.is_noop() {
            debug!("Aliases already up to date");
        }
        Ok(report)
    }

    /// Runs `actions` on the unit of `alias` in order, stopping at the first failure.
    async fn transition(&self, alias: &str, actions: [UnitAction; 2]) -> bool {
        let unit = self.config.unit_for(alias);
        for action in actions {
            if let Err(e) = self.supervisor.apply(&unit, action).await {
                warn!(unit, %action, error = %e, "Alias unit transition failed");
                return false;
            }
        }
        true
    }
}

/// Appends a `127.0.1.1` line for `hostname` unless a non-comment line names it.
///
/// Returns whether the file was changed. A missing file is created.
///
/// # Errors
///
/// Returns an error if the file cannot be read or written.
pub async fn ensure_hosts_entry(path: &Path, hostname: &str) -> io::Result<bool> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let present = content.lines().any(|line| {
        let line = line.split('#').next().unwrap_or_default();
        line.split_whitespace()
            .skip(1)
            .any(|name| name.eq_ignore_ascii_case(hostname))
    });
    if present {
        return Ok(false);
    }

    let mut updated = content;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&format!("{HOSTS_ADDRESS}\t{hostname}\n"));
    fs::write(path, updated).await?;
    info!(path = %path.display(), hostname, "Added hosts entry");
    Ok(true)
}
