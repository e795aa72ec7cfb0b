//! Configuration data types for the network components.
//!
//! Every field has a default, so an absent file or an empty table yields a
//! working configuration for a stock Raspberry Pi feeder image.

use core::time::Duration;
use std::path::PathBuf;

use netwarden_common::logging::LogFormat;
use serde::Deserialize;

/// Root config structure shared by all binaries.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct NetwardenConfig {
    pub log: LogConfig,
    pub probe: ProbeConfig,
    pub hotspot: HotspotConfig,
    pub watchdog: WatchdogConfig,
    pub aliases: AliasConfig,
}

/// Where and how log lines are written.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Shared log file all components append to. Logs go to stderr when omitted.
    pub file: Option<PathBuf>,
}

/// Settings for the reachability chain.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    /// Well-known public address pinged when the gateway does not answer.
    pub public_ip: String,
    /// URL fetched as the last resort, for networks that filter ICMP.
    pub http_url: String,
    /// Upper bound for each step of the chain, clamped to 1..=5 seconds.
    pub step_timeout_secs: u64,
    /// Echo requests sent per ping step.
    pub ping_count: u8,
    /// Routing table to read the default gateway from.
    pub route_table: PathBuf,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            public_ip: "8.8.8.8".to_owned(),
            http_url: "http://connectivitycheck.gstatic.com/generate_204".to_owned(),
            step_timeout_secs: 3,
            ping_count: 2,
            route_table: PathBuf::from("/proc/net/route"),
        }
    }
}

impl ProbeConfig {
    pub const MIN_STEP_TIMEOUT: Duration = Duration::from_secs(1);
    pub const MAX_STEP_TIMEOUT: Duration = Duration::from_secs(5);

    /// The per-step timeout, kept within the bounds callers rely on for predictable polling.
    #[must_use]
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
            .clamp(Self::MIN_STEP_TIMEOUT, Self::MAX_STEP_TIMEOUT)
    }
}

/// A template copied into the live OS configuration when the hotspot starts.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ApTemplate {
    pub source: PathBuf,
    pub target: PathBuf,
}

/// Settings for the captive hotspot fallback.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HotspotConfig {
    /// Interface name the templates are written for; replaced when the radio is called differently.
    pub template_interface: String,
    pub templates: Vec<ApTemplate>,
    /// Units making up the access point, started in this order.
    pub ap_services: Vec<String>,
    /// Network management service restarted after the user submitted credentials.
    pub network_service: String,
    /// Shell command of the captive configuration app; blocks until the user acts.
    pub captive_command: String,
    /// Written by the captive app once the user submitted credentials.
    pub sentinel: PathBuf,
    /// Marker signalling to the watchdog that the hotspot owns the network stack.
    pub ownership_marker: PathBuf,
    pub sysfs_net: PathBuf,
    pub enumeration_attempts: u32,
    pub enumeration_backoff_secs: u64,
    /// Time given to the network service to associate after new credentials were applied.
    pub settle_secs: u64,
    /// Pause before the captive app is started again after it exited without new credentials.
    pub portal_retry_backoff_secs: u64,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            template_interface: "wlan0".to_owned(),
            templates: vec![
                ApTemplate {
                    source: PathBuf::from("/etc/netwarden/hostapd.conf"),
                    target: PathBuf::from("/etc/hostapd/hostapd.conf"),
                },
                ApTemplate {
                    source: PathBuf::from("/etc/netwarden/dnsmasq.conf"),
                    target: PathBuf::from("/etc/dnsmasq.d/netwarden-hotspot.conf"),
                },
            ],
            ap_services: vec!["hostapd.service".to_owned(), "dnsmasq.service".to_owned()],
            network_service: "NetworkManager.service".to_owned(),
            captive_command: "/opt/netwarden/hotspot-app".to_owned(),
            sentinel: PathBuf::from("/run/netwarden/hotspot.configured"),
            ownership_marker: PathBuf::from("/run/netwarden/hotspot.owner"),
            sysfs_net: PathBuf::from("/sys/class/net"),
            enumeration_attempts: 5,
            enumeration_backoff_secs: 2,
            settle_secs: 20,
            portal_retry_backoff_secs: 5,
        }
    }
}

impl HotspotConfig {
    #[must_use]
    pub const fn enumeration_backoff(&self) -> Duration {
        Duration::from_secs(self.enumeration_backoff_secs)
    }

    #[must_use]
    pub const fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    #[must_use]
    pub const fn portal_retry_backoff(&self) -> Duration {
        Duration::from_secs(self.portal_retry_backoff_secs)
    }
}

/// Settings for the connectivity watchdog.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct WatchdogConfig {
    pub interval_secs: u64,
    /// Grace period after start before the first poll, lets boot-time networking settle.
    pub initial_delay_secs: u64,
    pub restart_threshold: u32,
    pub reboot_threshold: u32,
    pub network_service: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_secs: 120,
            initial_delay_secs: 60,
            restart_threshold: 3,
            reboot_threshold: 6,
            network_service: "NetworkManager.service".to_owned(),
        }
    }
}

impl WatchdogConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }
}

/// Settings for the mDNS alias reconciler.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AliasConfig {
    /// Alias every device answers to regardless of its hostname.
    pub fallback: String,
    pub domain: String,
    /// Template unit publishing one alias per instance, including the trailing `@`.
    pub unit_template: String,
    /// Where `systemctl enable` places the `*.wants/` links.
    pub unit_dir: PathBuf,
    pub hosts_file: PathBuf,
}

impl Default for AliasConfig {
    fn default() -> Self {
        Self {
            fallback: "adsb-feeder".to_owned(),
            domain: "local".to_owned(),
            unit_template: "avahi-alias@".to_owned(),
            unit_dir: PathBuf::from("/etc/systemd/system"),
            hosts_file: PathBuf::from("/etc/hosts"),
        }
    }
}

impl AliasConfig {
    /// Full unit name serving `alias`.
    #[must_use]
    pub fn unit_for(&self, alias: &str) -> String {
        format!("{}{alias}.service", self.unit_template)
    }
}
