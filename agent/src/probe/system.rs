//! [`NetworkProbes`] backed by the running Linux system.

use core::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};
use std::{path::PathBuf, process::Stdio};

use tokio::{fs, process::Command};
use tracing::{debug, warn};

use super::NetworkProbes;
use crate::config::ProbeConfig;

const RTF_UP: u32 = 0x0001;
const RTF_GATEWAY: u32 = 0x0002;

/// Reads the routing table from procfs, pings with the system `ping` binary and
/// performs the HTTP check with `reqwest`.
#[derive(Debug, Clone)]
pub struct SystemProbes {
    route_table: PathBuf,
    ping_count: u8,
    step_timeout: Duration,
    http: reqwest::Client,
}

impl SystemProbes {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &ProbeConfig) -> Result<Self, reqwest::Error> {
        let step_timeout = config.step_timeout();
        let http = reqwest::Client::builder()
            .timeout(step_timeout)
            .connect_timeout(step_timeout)
            .build()?;
        Ok(Self {
            route_table: config.route_table.clone(),
            ping_count: config.ping_count.max(1),
            step_timeout,
            http,
        })
    }
}

impl NetworkProbes for SystemProbes {
    async fn default_gateway(&self) -> Option<IpAddr> {
        match fs::read_to_string(&self.route_table).await {
            Ok(table) => parse_default_gateway(&table).map(IpAddr::V4),
            Err(e) => {
                warn!(path = %self.route_table.display(), error = %e, "Cannot read routing table");
                None
            }
        }
    }

    async fn ping(&self, target: IpAddr) -> bool {
        let status = Command::new("ping")
            .arg("-q")
            .arg("-n")
            .args(["-c", &self.ping_count.to_string()])
            .args(["-W", &self.step_timeout.as_secs().max(1).to_string()])
            .arg(target.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // killed when the step times out
            .kill_on_drop(true)
            .status()
            .await;
        match status {
            Ok(status) => status.success(),
            Err(e) => {
                warn!(%target, error = %e, "Failed to run ping");
                false
            }
        }
    }

    async fn http_check(&self, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(response) => {
                debug!(url, status = %response.status(), "HTTP check answered");
                true
            }
            Err(e) => {
                debug!(url, error = %e, "HTTP check failed");
                false
            }
        }
    }
}

/// Extracts the gateway of the first usable default route from `/proc/net/route` content.
///
/// Addresses in that file are the raw in-memory representation of the
/// network-order address, printed as a native-endian hex integer.
#[must_use]
pub fn parse_default_gateway(table: &str) -> Option<Ipv4Addr> {
    table.lines().skip(1).find_map(|line| {
        let mut columns = line.split_whitespace();
        let (_iface, destination, gateway, flags) = (
            columns.next()?,
            columns.next()?,
            columns.next()?,
            columns.next()?,
        );
        let destination = u32::from_str_radix(destination, 16).ok()?;
        let gateway = u32::from_str_radix(gateway, 16).ok()?;
        let flags = u32::from_str_radix(flags, 16).ok()?;
        let usable = flags & (RTF_UP | RTF_GATEWAY) == (RTF_UP | RTF_GATEWAY);
        (destination == 0 && usable && gateway != 0).then(|| Ipv4Addr::from(gateway.to_ne_bytes()))
    })
}
