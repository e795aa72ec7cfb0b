//! Advisory ownership of the network stack while the hotspot is up.
//!
//! The hotspot controller claims ownership before it touches the AP services
//! and releases it after teardown. The watchdog checks the claim before every
//! poll and stays out of the way while it is held.
//!
//! This is a signal, not a lock: the watchdog reads the claim and then acts,
//! so a controller claiming in between is not noticed until the next tick.
//!
//! The marker records the PID of the claiming process. A marker whose process
//! is gone is stale and claims nothing, so a killed hotspot cannot silence the
//! watchdog until the next reboot.

use std::{io, path::PathBuf, process};

use chrono::Local;
use netwarden_common::{ServiceSupervisor, process_exists};
use tokio::fs;
use tracing::{debug, warn};

use crate::config::HotspotConfig;

/// Who holds the marker file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerOwner {
    Absent,
    Live,
    /// The recorded process is gone or the marker is unreadable garbage.
    Stale,
}

#[derive(Debug, Clone)]
pub struct HotspotOwnership {
    marker: PathBuf,
    ap_unit: Option<String>,
}

impl HotspotOwnership {
    /// `ap_unit` is the AP service whose activation also counts as a claim.
    pub fn new(marker: impl Into<PathBuf>, ap_unit: Option<String>) -> Self {
        Self {
            marker: marker.into(),
            ap_unit,
        }
    }

    #[must_use]
    pub fn from_config(config: &HotspotConfig) -> Self {
        Self::new(
            config.ownership_marker.clone(),
            config.ap_services.first().cloned(),
        )
    }

    /// Writes the marker file.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker or its directory cannot be written.
    pub async fn claim(&self) -> io::Result<()> {
        if let Some(parent) = self.marker.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = format!(
            "pid={}\nsince={}\n",
            process::id(),
            Local::now().to_rfc3339()
        );
        fs::write(&self.marker, content).await?;
        debug!(marker = %self.marker.display(), "Claimed network stack for the hotspot");
        Ok(())
    }

    /// Removes the marker file. A marker that is already gone is fine.
    pub async fn release(&self) {
        match fs::remove_file(&self.marker).await {
            Ok(()) => debug!(marker = %self.marker.display(), "Released hotspot claim"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(marker = %self.marker.display(), error = %e, "Failed to remove hotspot marker");
            }
        }
    }

    /// Removes the marker if the process that wrote it is gone.
    ///
    /// Returns whether a stale marker was removed.
    pub async fn release_if_stale(&self) -> bool {
        if self.marker_owner().await == MarkerOwner::Stale {
            warn!(marker = %self.marker.display(), "Removing stale hotspot marker");
            self.release().await;
            true
        } else {
            false
        }
    }

    /// Whether the hotspot currently owns, or is about to own, the network stack.
    ///
    /// A live marker is a claim. Without a marker, an AP unit that is up counts
    /// as one. A stale marker means the hotspot died, its leftover AP unit does
    /// not count.
    pub async fn is_claimed<S: ServiceSupervisor>(&self, supervisor: &S) -> bool {
        match self.marker_owner().await {
            MarkerOwner::Live => true,
            MarkerOwner::Stale => {
                debug!(marker = %self.marker.display(), "Ignoring stale hotspot marker");
                false
            }
            MarkerOwner::Absent => match self.ap_unit {
                Some(ref unit) => supervisor.state(unit).await.is_up(),
                None => false,
            },
        }
    }

    async fn marker_owner(&self) -> MarkerOwner {
        let content = match fs::read_to_string(&self.marker).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return MarkerOwner::Absent,
            Err(e) => {
                warn!(marker = %self.marker.display(), error = %e, "Cannot read hotspot marker, assuming it is held");
                return MarkerOwner::Live;
            }
        };
        match parse_pid(&content) {
            Some(pid) if process_exists(pid) => MarkerOwner::Live,
            _ => MarkerOwner::Stale,
        }
    }
}

fn parse_pid(marker: &str) -> Option<i32> {
    marker
        .lines()
        .find_map(|line| line.strip_prefix("pid="))
        .and_then(|pid| pid.trim().parse().ok())
}
