//! Service supervisor seam and its systemd implementation.
//!
//! Every component drives the OS exclusively through [`ServiceSupervisor`], so
//! the control loops can be exercised against a recording fake in tests.

use alloc::collections::BTreeSet;
use core::fmt;
use std::{
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Output, Stdio},
};

use thiserror::Error as ThisError;
use tokio::{fs, process::Command};
use tracing::debug;

/// Lifecycle transition that can be requested for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitAction {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
    Mask,
    Unmask,
}

impl UnitAction {
    /// The `systemctl` verb for this transition.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Mask => "mask",
            Self::Unmask => "unmask",
        }
    }
}

impl fmt::Display for UnitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Activation state of a unit, as printed by `systemctl is-active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Active,
    Activating,
    Reloading,
    Deactivating,
    Inactive,
    Failed,
    Unknown,
}

impl UnitState {
    /// Parses the single word `systemctl is-active` prints.
    #[must_use]
    pub fn parse(word: &str) -> Self {
        match word.trim() {
            "active" => Self::Active,
            "activating" => Self::Activating,
            "reloading" => Self::Reloading,
            "deactivating" => Self::Deactivating,
            "inactive" => Self::Inactive,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Whether the unit is running or on its way up.
    #[must_use]
    pub const fn is_up(self) -> bool {
        matches!(self, Self::Active | Self::Activating | Self::Reloading)
    }
}

/// Errors raised while talking to the service supervisor.
#[derive(Debug, ThisError)]
pub enum SupervisorError {
    #[error("Failed to run `systemctl {args}`")]
    Spawn {
        args: String,
        #[source]
        source: io::Error,
    },
    #[error("`systemctl {args}` exited with {status}: {stderr}")]
    Failed {
        args: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("Failed to scan unit directory {path:?}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Operations the network components need from the process supervisor.
#[expect(
    async_fn_in_trait,
    reason = "Only used through generics on a current-thread runtime, the futures never need to be Send."
)]
pub trait ServiceSupervisor {
    /// Requests a lifecycle transition for `unit`.
    async fn apply(&self, unit: &str, action: UnitAction) -> Result<(), SupervisorError>;

    /// Queries the activation state of `unit`. Never fails, unreadable states are [`UnitState::Unknown`].
    async fn state(&self, unit: &str) -> UnitState;

    /// Lists the instance names of the template unit `template` (e.g. `avahi-alias@`) that are enabled.
    async fn enabled_instances(&self, template: &str) -> Result<BTreeSet<String>, SupervisorError>;

    /// Reboots the machine.
    async fn reboot(&self) -> Result<(), SupervisorError>;
}

impl<S: ServiceSupervisor + ?Sized> ServiceSupervisor for &S {
    async fn apply(&self, unit: &str, action: UnitAction) -> Result<(), SupervisorError> {
        (**self).apply(unit, action).await
    }

    async fn state(&self, unit: &str) -> UnitState {
        (**self).state(unit).await
    }

    async fn enabled_instances(&self, template: &str) -> Result<BTreeSet<String>, SupervisorError> {
        (**self).enabled_instances(template).await
    }

    async fn reboot(&self) -> Result<(), SupervisorError> {
        (**self).reboot().await
    }
}

/// [`ServiceSupervisor`] backed by `systemctl`.
#[derive(Debug, Clone)]
pub struct Systemctl {
    unit_dir: PathBuf,
}

impl Systemctl {
    /// Creates a supervisor that looks for enabled template instances below `unit_dir`
    /// (usually `/etc/systemd/system`).
    pub fn new(unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            unit_dir: unit_dir.into(),
        }
    }

    async fn run(args: &[&str]) -> Result<Output, SupervisorError> {
        let joined = args.join(" ");
        debug!(args = %joined, "Running systemctl");
        Command::new("systemctl")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| SupervisorError::Spawn {
                args: joined,
                source,
            })
    }

    async fn run_checked(args: &[&str]) -> Result<(), SupervisorError> {
        let output = Self::run(args).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(SupervisorError::Failed {
                args: args.join(" "),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }
}

impl Default for Systemctl {
    fn default() -> Self {
        Self::new("/etc/systemd/system")
    }
}

impl ServiceSupervisor for Systemctl {
    async fn apply(&self, unit: &str, action: UnitAction) -> Result<(), SupervisorError> {
        Self::run_checked(&[action.verb(), unit]).await
    }

    async fn state(&self, unit: &str) -> UnitState {
        // `is-active` exits non-zero for anything but "active", the word on stdout is what counts
        match Self::run(&["is-active", unit]).await {
            Ok(output) => UnitState::parse(&String::from_utf8_lossy(&output.stdout)),
            Err(e) => {
                debug!(unit, error = %e, "Could not query unit state");
                UnitState::Unknown
            }
        }
    }

    async fn enabled_instances(&self, template: &str) -> Result<BTreeSet<String>, SupervisorError> {
        scan_enabled_instances(&self.unit_dir, template).await
    }

    async fn reboot(&self) -> Result<(), SupervisorError> {
        Self::run_checked(&["reboot"]).await
    }
}

/// Extracts the instance part of `file_name` if it is an instance of `template`.
///
/// `avahi-alias@feeder.local.service` with template `avahi-alias@` yields `feeder.local`.
#[must_use]
pub fn instance_name<'name>(file_name: &'name str, template: &str) -> Option<&'name str> {
    file_name
        .strip_prefix(template)?
        .strip_suffix(".service")
        .filter(|instance| !instance.is_empty())
}

/// Collects enabled instances by looking at the `*.wants/` symlinks `systemctl enable` creates.
async fn scan_enabled_instances(
    unit_dir: &Path,
    template: &str,
) -> Result<BTreeSet<String>, SupervisorError> {
    let scan_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| SupervisorError::Scan { path, source }
    };

    let mut instances = BTreeSet::new();
    let mut dirs = match fs::read_dir(unit_dir).await {
        Ok(dirs) => dirs,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(instances),
        Err(e) => return Err(scan_err(unit_dir)(e)),
    };

    while let Some(dir) = dirs.next_entry().await.map_err(scan_err(unit_dir))? {
        let wants_dir = dir.path();
        if !wants_dir
            .file_name()
            .is_some_and(|name| name.to_string_lossy().ends_with(".wants"))
        {
            continue;
        }
        if !fs::metadata(&wants_dir).await.is_ok_and(|meta| meta.is_dir()) {
            debug!(path = %wants_dir.display(), "Skipping .wants entry that is not a directory");
            continue;
        }
        let mut entries = fs::read_dir(&wants_dir)
            .await
            .map_err(scan_err(&wants_dir))?;
        while let Some(entry) = entries.next_entry().await.map_err(scan_err(&wants_dir))? {
            let file_name = entry.file_name();
            if let Some(instance) = instance_name(&file_name.to_string_lossy(), template) {
                instances.insert(instance.to_owned());
            }
        }
    }

    Ok(instances)
}
