//! OS side of the hotspot: radio discovery, AP configuration and the captive app.

use std::{io, path::Path, process::Stdio};

use eyre::WrapErr as _;
use tokio::{fs, process::Command};
use tracing::{debug, info, warn};

use crate::config::HotspotConfig;

/// What the captive configuration app reported when it returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalOutcome {
    /// The user entered network credentials, the sentinel file was written.
    CredentialsSubmitted,
    /// The app returned without new credentials (crash, restart, timeout).
    Exited,
}

/// Hardware and configuration primitives the hotspot controller drives.
#[expect(
    async_fn_in_trait,
    reason = "Only used through generics on a current-thread runtime, the futures never need to be Send."
)]
pub trait HotspotPlatform {
    /// Names of the wireless interfaces currently present, sorted.
    async fn wireless_interfaces(&self) -> io::Result<Vec<String>>;

    /// Writes the AP daemon configuration for `interface`.
    async fn install_ap_config(&self, interface: &str) -> eyre::Result<()>;

    /// Runs the captive configuration app.
    ///
    /// Blocks until the user submitted credentials or the app otherwise exits.
    async fn run_captive_portal(&self, interface: &str) -> eyre::Result<PortalOutcome>;
}

impl<P: HotspotPlatform + ?Sized> HotspotPlatform for &P {
    async fn wireless_interfaces(&self) -> io::Result<Vec<String>> {
        (**self).wireless_interfaces().await
    }

    async fn install_ap_config(&self, interface: &str) -> eyre::Result<()> {
        (**self).install_ap_config(interface).await
    }

    async fn run_captive_portal(&self, interface: &str) -> eyre::Result<PortalOutcome> {
        (**self).run_captive_portal(interface).await
    }
}

/// [`HotspotPlatform`] backed by sysfs, template files and a shell command.
#[derive(Debug, Clone)]
pub struct SystemHotspot {
    config: HotspotConfig,
}

impl SystemHotspot {
    #[must_use]
    pub const fn new(config: HotspotConfig) -> Self {
        Self { config }
    }
}

impl HotspotPlatform for SystemHotspot {
    async fn wireless_interfaces(&self) -> io::Result<Vec<String>> {
        let mut found = Vec::new();
        let mut entries = match fs::read_dir(&self.config.sysfs_net).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            if is_wireless(&entry.path()).await {
                found.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        found.sort();
        Ok(found)
    }

    async fn install_ap_config(&self, interface: &str) -> eyre::Result<()> {
        for template in &self.config.templates {
            let content = fs::read_to_string(&template.source)
                .await
                .wrap_err(format!("Failed to read AP template {:?}", template.source))?;
            let content = if interface == self.config.template_interface {
                content
            } else {
                content.replace(&self.config.template_interface, interface)
            };
            if let Some(parent) = template.target.parent() {
                fs::create_dir_all(parent)
                    .await
                    .wrap_err(format!("Failed to create {parent:?}"))?;
            }
            fs::write(&template.target, content)
                .await
                .wrap_err(format!("Failed to write AP config {:?}", template.target))?;
            debug!(target = %template.target.display(), interface, "Installed AP config");
        }
        Ok(())
    }

    async fn run_captive_portal(&self, interface: &str) -> eyre::Result<PortalOutcome> {
        remove_stale_sentinel(&self.config.sentinel).await;

        info!(command = %self.config.captive_command, interface, "Starting captive configuration app");
        let status = Command::new("sh")
            .arg("-c")
            .arg(&self.config.captive_command)
            .env("NETWARDEN_INTERFACE", interface)
            .env("NETWARDEN_SENTINEL", &self.config.sentinel)
            .stdin(Stdio::null())
            .status()
            .await
            .wrap_err(format!(
                "Failed to run captive app `{}`",
                self.config.captive_command
            ))?;
        if !status.success() {
            warn!(%status, "Captive configuration app exited unsuccessfully");
        }

        if fs::try_exists(&self.config.sentinel).await.unwrap_or(false) {
            Ok(PortalOutcome::CredentialsSubmitted)
        } else {
            Ok(PortalOutcome::Exited)
        }
    }
}

async fn is_wireless(interface_dir: &Path) -> bool {
    for marker in ["wireless", "phy80211"] {
        if fs::try_exists(interface_dir.join(marker))
            .await
            .unwrap_or(false)
        {
            return true;
        }
    }
    false
}

async fn remove_stale_sentinel(sentinel: &Path) {
    match fs::remove_file(sentinel).await {
        Ok(()) => debug!(sentinel = %sentinel.display(), "Removed stale sentinel"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(sentinel = %sentinel.display(), error = %e, "Failed to remove stale sentinel"),
    }
}

#[cfg(test)]
mod tests {
    use std::fs as std_fs;

    use super::*;
    use crate::{config::ApTemplate, testing::test_hotspot_config};

    #[tokio::test]
    async fn finds_wireless_interfaces_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_hotspot_config(dir.path());
        for (iface, marker) in [
            ("eth0", None),
            ("lo", None),
            ("wlan1", Some("phy80211")),
            ("wlan0", Some("wireless")),
        ] {
            let iface_dir = config.sysfs_net.join(iface);
            std_fs::create_dir_all(&iface_dir).unwrap();
            if let Some(marker) = marker {
                std_fs::create_dir(iface_dir.join(marker)).unwrap();
            }
        }

        let found = SystemHotspot::new(config).wireless_interfaces().await.unwrap();
        assert_eq!(found, vec!["wlan0".to_owned(), "wlan1".to_owned()]);
    }

    #[tokio::test]
    async fn missing_sysfs_means_no_radio() {
        let dir = tempfile::tempdir().unwrap();
        let found = SystemHotspot::new(test_hotspot_config(dir.path()))
            .wireless_interfaces()
            .await
            .unwrap();
        assert!(found.is_empty(), "no sysfs, no interfaces");
    }

    #[tokio::test]
    async fn templates_get_the_discovered_interface() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("hostapd.conf");
        let target = dir.path().join("etc/hostapd/hostapd.conf");
        std_fs::write(&source, "interface=wlan0\nssid=adsb-feeder\n").unwrap();
        let config = HotspotConfig {
            templates: vec![ApTemplate {
                source,
                target: target.clone(),
            }],
            ..test_hotspot_config(dir.path())
        };
        let platform = SystemHotspot::new(config);

        platform.install_ap_config("wlx00c0ca").await.unwrap();
        assert_eq!(
            std_fs::read_to_string(&target).unwrap(),
            "interface=wlx00c0ca\nssid=adsb-feeder\n"
        );

        platform.install_ap_config("wlan0").await.unwrap();
        assert_eq!(
            std_fs::read_to_string(&target).unwrap(),
            "interface=wlan0\nssid=adsb-feeder\n"
        );
    }

    #[tokio::test]
    async fn missing_template_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = HotspotConfig {
            templates: vec![ApTemplate {
                source: dir.path().join("absent.conf"),
                target: dir.path().join("out.conf"),
            }],
            ..test_hotspot_config(dir.path())
        };
        let res = SystemHotspot::new(config).install_ap_config("wlan0").await;
        assert!(res.is_err(), "Expected error for missing template");
    }

    #[tokio::test]
    async fn sentinel_written_by_app_means_credentials_submitted() {
        let dir = tempfile::tempdir().unwrap();
        let config = HotspotConfig {
            captive_command: r#"touch "$NETWARDEN_SENTINEL""#.to_owned(),
            ..test_hotspot_config(dir.path())
        };

        let outcome = SystemHotspot::new(config)
            .run_captive_portal("wlan0")
            .await
            .unwrap();
        assert_eq!(outcome, PortalOutcome::CredentialsSubmitted);
    }

    #[tokio::test]
    async fn stale_sentinel_is_cleared_before_the_app_runs() {
        let dir = tempfile::tempdir().unwrap();
        let config = HotspotConfig {
            captive_command: "exit 3".to_owned(),
            ..test_hotspot_config(dir.path())
        };
        std_fs::write(&config.sentinel, "").unwrap();

        let outcome = SystemHotspot::new(config)
            .run_captive_portal("wlan0")
            .await
            .unwrap();
        assert_eq!(outcome, PortalOutcome::Exited);
    }
}
