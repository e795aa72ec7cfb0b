//! Connectivity prober: answers "is the network up?" through an ordered
//! fallback chain of reachability checks.
//!
//! The chain short-circuits on the first step that succeeds:
//! 1. ping the default-route gateway,
//! 2. ping a well-known public address,
//! 3. fetch a well-known URL over plain HTTP.
//!
//! Every step is bounded by the configured step timeout, so a probe never
//! takes longer than three step timeouts.

mod system;

pub use system::*;

use core::{fmt, future::Future, net::IpAddr, time::Duration};

use chrono::{DateTime, Local};
use eyre::WrapErr as _;
use tokio::time::timeout;
use tracing::debug;

use crate::config::ProbeConfig;

/// The step of the reachability chain that answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    Gateway,
    PublicDns,
    Http,
}

impl fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::Gateway => "gateway",
            Self::PublicDns => "public-dns",
            Self::Http => "http",
        })
    }
}

/// Outcome of a single probe. Produced fresh every time, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReachabilityResult {
    pub reachable: bool,
    /// The step that succeeded, `None` if all of them failed.
    pub method: Option<ProbeMethod>,
    pub observed_at: DateTime<Local>,
}

impl ReachabilityResult {
    fn now(method: Option<ProbeMethod>) -> Self {
        Self {
            reachable: method.is_some(),
            method,
            observed_at: Local::now(),
        }
    }
}

/// OS primitives the reachability chain is built from.
#[expect(
    async_fn_in_trait,
    reason = "Only used through generics on a current-thread runtime, the futures never need to be Send."
)]
pub trait NetworkProbes {
    /// The gateway of the current default route, if there is one.
    async fn default_gateway(&self) -> Option<IpAddr>;

    /// Whether `target` answers an ICMP echo.
    async fn ping(&self, target: IpAddr) -> bool;

    /// Whether `url` produces any HTTP response.
    async fn http_check(&self, url: &str) -> bool;
}

impl<N: NetworkProbes + ?Sized> NetworkProbes for &N {
    async fn default_gateway(&self) -> Option<IpAddr> {
        (**self).default_gateway().await
    }

    async fn ping(&self, target: IpAddr) -> bool {
        (**self).ping(target).await
    }

    async fn http_check(&self, url: &str) -> bool {
        (**self).http_check(url).await
    }
}

/// Runs the reachability chain against a set of [`NetworkProbes`].
#[derive(Debug)]
pub struct Prober<N> {
    probes: N,
    public_ip: IpAddr,
    http_url: String,
    step_timeout: Duration,
}

impl<N: NetworkProbes> Prober<N> {
    /// # Errors
    ///
    /// Returns an error if the configured public address is not an IP address.
    pub fn new(probes: N, config: &ProbeConfig) -> eyre::Result<Self> {
        let public_ip = config
            .public_ip
            .parse()
            .wrap_err(format!("Invalid probe.public_ip: {:?}", config.public_ip))?;
        Ok(Self {
            probes,
            public_ip,
            http_url: config.http_url.clone(),
            step_timeout: config.step_timeout(),
        })
    }

    /// Runs the chain once.
    ///
    /// Without a default route nothing else can answer either, so the chain
    /// stops right there.
    pub async fn probe(&self) -> ReachabilityResult {
        let Some(gateway) = self.probes.default_gateway().await else {
            debug!("No default route, network unreachable");
            return ReachabilityResult::now(None);
        };
        if self
            .bounded(ProbeMethod::Gateway, self.probes.ping(gateway))
            .await
        {
            return ReachabilityResult::now(Some(ProbeMethod::Gateway));
        }

        if self
            .bounded(ProbeMethod::PublicDns, self.probes.ping(self.public_ip))
            .await
        {
            return ReachabilityResult::now(Some(ProbeMethod::PublicDns));
        }

        if self
            .bounded(ProbeMethod::Http, self.probes.http_check(&self.http_url))
            .await
        {
            return ReachabilityResult::now(Some(ProbeMethod::Http));
        }

        ReachabilityResult::now(None)
    }

    async fn bounded(&self, method: ProbeMethod, step: impl Future<Output = bool>) -> bool {
        let answered = timeout(self.step_timeout, step).await.unwrap_or_else(|_| {
            debug!(%method, "Probe step timed out");
            false
        });
        debug!(%method, answered, "Probe step finished");
        answered
    }
}
