//! Connectivity watchdog.
//!
//! Polls the prober on a fixed interval and escalates through the
//! [`EscalationPolicy`] while the network stays down. Stays quiet while the
//! hotspot owns the network stack.

mod policy;

pub use policy::*;

use core::time::Duration;

use netwarden_common::{ServiceSupervisor, UnitAction};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, warn};

use crate::{
    config::WatchdogConfig,
    hotspot::HotspotOwnership,
    probe::{NetworkProbes, ProbeMethod, Prober},
};

/// Consecutive failed polls and the last remediation attempted for them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureLadder {
    pub consecutive_failures: u32,
    pub last_action: RemediationAction,
}

impl FailureLadder {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The hotspot held the network stack, nothing was probed.
    Skipped,
    Reachable(ProbeMethod),
    Unreachable {
        consecutive_failures: u32,
        action: Option<RemediationAction>,
    },
}

pub struct Watchdog<N, S> {
    prober: Prober<N>,
    supervisor: S,
    policy: EscalationPolicy,
    ownership: HotspotOwnership,
    network_service: String,
    interval: Duration,
    initial_delay: Duration,
    ladder: FailureLadder,
}

impl<N: NetworkProbes, S: ServiceSupervisor> Watchdog<N, S> {
    /// # Errors
    ///
    /// Returns an error if the configured thresholds do not form a valid ladder.
    pub fn new(
        prober: Prober<N>,
        supervisor: S,
        ownership: HotspotOwnership,
        config: &WatchdogConfig,
    ) -> Result<Self, PolicyError> {
        Ok(Self {
            prober,
            supervisor,
            policy: EscalationPolicy::from_config(config)?,
            ownership,
            network_service: config.network_service.clone(),
            interval: config.interval(),
            initial_delay: config.initial_delay(),
            ladder: FailureLadder::default(),
        })
    }

    pub const fn ladder(&self) -> FailureLadder {
        self.ladder
    }

    /// Polls forever.
    pub async fn run(mut self) {
        info!(
            interval = ?self.interval,
            initial_delay = ?self.initial_delay,
            "Watchdog started"
        );
        sleep(self.initial_delay).await;

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let outcome = self.tick().await;
            debug!(?outcome, "Watchdog tick finished");
        }
    }

    /// One poll: probe, update the ladder, remediate if a threshold is hit.
    #[tracing::instrument(skip_all, fields(failures = self.ladder.consecutive_failures))]
    pub async fn tick(&mut self) -> TickOutcome {
        if self.ownership.is_claimed(&self.supervisor).await {
            debug!("Hotspot owns the network, skipping poll");
            return TickOutcome::Skipped;
        }

        let result = self.prober.probe().await;
        if let Some(method) = result.method {
            if self.ladder.consecutive_failures > 0 {
                info!(%method, after = self.ladder.consecutive_failures, "Network reachable again");
            }
            self.ladder.reset();
            return TickOutcome::Reachable(method);
        }

        self.ladder.consecutive_failures = self.ladder.consecutive_failures.saturating_add(1);
        let consecutive_failures = self.ladder.consecutive_failures;
        warn!(consecutive_failures, "Network unreachable");

        let action = self.policy.action_for(consecutive_failures);
        if let Some(action) = action {
            self.remediate(action).await;
            self.ladder.last_action = action;
        }
        TickOutcome::Unreachable {
            consecutive_failures,
            action,
        }
    }

    async fn remediate(&self, action: RemediationAction) {
        let res = match action {
            RemediationAction::None => return,
            RemediationAction::RestartNetworkService => {
                info!(unit = %self.network_service, "Restarting network service");
                self.supervisor
                    .apply(&self.network_service, UnitAction::Restart)
                    .await
            }
            RemediationAction::Reboot => {
                warn!("Network still unreachable, rebooting");
                self.supervisor.reboot().await
            }
        };
        if let Err(e) = res {
            error!(%action, error = %e, "Remediation failed");
        }
    }
}
