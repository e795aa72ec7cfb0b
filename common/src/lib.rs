//! Shared plumbing for the netwarden binaries.
//!
//! This crate provides:
//! - the service supervisor seam and its `systemctl` implementation
//! - tracing initialisation shared by every component
//! - privilege and hostname helpers
#![cfg_attr(
    test,
    expect(clippy::unwrap_used, reason = "Unwrapping is fine in tests")
)]

extern crate alloc;
extern crate core;

pub mod logging;
mod supervisor;

pub use supervisor::*;

use std::path::Path;

use eyre::{WrapErr as _, eyre};
use nix::{errno::Errno, sys::signal, unistd::Pid};

/// Returns `true` if the current process is running as superuser (root).
#[must_use]
pub fn is_superuser() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Returns `true` if the system uses systemd (detects `/run/systemd/system`).
#[must_use]
pub fn is_systemd() -> bool {
    Path::new("/run/systemd/system").exists()
}

/// Returns the kernel hostname of this machine.
///
/// # Errors
///
/// Returns an error if the hostname cannot be read or is not valid UTF-8.
pub fn system_hostname() -> eyre::Result<String> {
    nix::unistd::gethostname()
        .wrap_err("Failed to read system hostname")?
        .into_string()
        .map_err(|raw| eyre!("System hostname is not valid UTF-8: {raw:?}"))
}

/// Returns `true` if a process with this PID exists.
///
/// Sends the null signal, so nothing is delivered. A process owned by
/// another user still counts as existing.
#[must_use]
pub fn process_exists(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    !matches!(signal::kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
}
