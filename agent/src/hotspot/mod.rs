//! Captive hotspot fallback.
//!
//! When the device cannot reach the network at boot, the controller brings up
//! a local access point and keeps a captive configuration app running on it
//! until the prober reports connectivity again. Then the AP services are
//! stopped and masked so nothing else reactivates them.
//!
//! ```text
//! Checking -> ApStarting -> ApActive -> Checking -> Connected
//!     |                        ^            |
//!     |                        +------------+
//!     +-> GaveUp (no wireless interface)
//! ```

mod ownership;
mod platform;

pub use ownership::*;
pub use platform::*;

use chrono::{DateTime, Local};
use netwarden_common::{ServiceSupervisor, UnitAction};
use thiserror::Error as ThisError;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    config::HotspotConfig,
    probe::{NetworkProbes, ProbeMethod, Prober},
};

/// Where the controller currently is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotspotState {
    Checking,
    ApStarting,
    /// The AP is up and the captive app waits for the user.
    ApActive,
    Connected,
    GaveUp,
}

/// The access point the controller currently runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotspotSession {
    pub interface: String,
    pub active: bool,
    pub started_at: DateTime<Local>,
}

/// Terminal success of [`HotspotController::ensure_connectivity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connected {
    pub method: ProbeMethod,
    /// Whether the AP had to be brought up on the way.
    pub hotspot_used: bool,
    /// How often the captive app was run.
    pub portal_rounds: u32,
}

/// Terminal failure of [`HotspotController::ensure_connectivity`].
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum GaveUp {
    #[error("No wireless interface{} found after {attempts} attempts", named(.preferred.as_deref()))]
    NoWirelessInterface {
        attempts: u32,
        preferred: Option<String>,
    },
}

fn named(preferred: Option<&str>) -> String {
    preferred.map(|p| format!(" named {p:?}")).unwrap_or_default()
}

pub struct HotspotController<N, S, P> {
    prober: Prober<N>,
    supervisor: S,
    platform: P,
    ownership: HotspotOwnership,
    config: HotspotConfig,
    preferred_interface: Option<String>,
    state: HotspotState,
    session: Option<HotspotSession>,
}

impl<N, S, P> HotspotController<N, S, P>
where
    N: NetworkProbes,
    S: ServiceSupervisor,
    P: HotspotPlatform,
{
    pub fn new(prober: Prober<N>, supervisor: S, platform: P, config: HotspotConfig) -> Self {
        Self {
            prober,
            supervisor,
            platform,
            ownership: HotspotOwnership::from_config(&config),
            config,
            preferred_interface: None,
            state: HotspotState::Checking,
            session: None,
        }
    }

    /// Only accept this interface for the AP instead of the first one found.
    #[must_use]
    pub fn with_preferred_interface(mut self, interface: Option<String>) -> Self {
        self.preferred_interface = interface;
        self
    }

    pub const fn state(&self) -> HotspotState {
        self.state
    }

    pub const fn session(&self) -> Option<&HotspotSession> {
        self.session.as_ref()
    }

    /// Makes sure the device is connected, running the hotspot for as long as it takes.
    ///
    /// Returns immediately when the network already works. Otherwise this only
    /// returns once the prober succeeds, or fails when there is no radio to
    /// host the AP on.
    ///
    /// # Errors
    ///
    /// Returns [`GaveUp`] if no (matching) wireless interface shows up.
    #[tracing::instrument(skip_all, fields(preferred = ?self.preferred_interface))]
    pub async fn ensure_connectivity(&mut self) -> Result<Connected, GaveUp> {
        if let Some(method) = self.check().await {
            info!(%method, "Network reachable, no hotspot needed");
            self.ownership.release_if_stale().await;
            self.transition(HotspotState::Connected);
            return Ok(Connected {
                method,
                hotspot_used: false,
                portal_rounds: 0,
            });
        }

        let Some(interface) = self.find_interface().await else {
            self.transition(HotspotState::GaveUp);
            let gave_up = GaveUp::NoWirelessInterface {
                attempts: self.enumeration_attempts(),
                preferred: self.preferred_interface.clone(),
            };
            error!("{gave_up}, cannot offer a hotspot");
            return Err(gave_up);
        };

        let mut portal_rounds = 0;
        loop {
            self.start_ap(&interface).await;

            loop {
                portal_rounds += 1;
                let outcome = match self.platform.run_captive_portal(&interface).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(error = ?e, "Captive configuration app failed");
                        PortalOutcome::Exited
                    }
                };

                if outcome == PortalOutcome::CredentialsSubmitted {
                    info!("New credentials submitted, trying them");
                    self.apply_credentials().await;
                    if let Some(method) = self.check().await {
                        return Ok(self.finish(method, portal_rounds).await);
                    }
                    warn!("New credentials did not bring the network up, restarting hotspot");
                    break;
                }

                if let Some(method) = self.check().await {
                    return Ok(self.finish(method, portal_rounds).await);
                }
                self.transition(HotspotState::ApActive);
                debug!(backoff = ?self.config.portal_retry_backoff(), "Restarting captive app after backoff");
                sleep(self.config.portal_retry_backoff()).await;
            }
        }
    }

    fn transition(&mut self, next: HotspotState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "Hotspot state change");
            self.state = next;
        }
    }

    fn enumeration_attempts(&self) -> u32 {
        self.config.enumeration_attempts.max(1)
    }

    async fn check(&mut self) -> Option<ProbeMethod> {
        self.transition(HotspotState::Checking);
        self.prober.probe().await.method
    }

    /// Radios may enumerate late during boot, so this retries a few times.
    async fn find_interface(&self) -> Option<String> {
        let attempts = self.enumeration_attempts();
        for attempt in 1..=attempts {
            match self.platform.wireless_interfaces().await {
                Ok(found) => {
                    let pick = match self.preferred_interface {
                        Some(ref preferred) => found.into_iter().find(|i| i == preferred),
                        None => found.into_iter().next(),
                    };
                    if let Some(interface) = pick {
                        info!(interface, attempt, "Found wireless interface");
                        return Some(interface);
                    }
                    info!(attempt, attempts, "No wireless interface yet");
                }
                Err(e) => warn!(attempt, error = %e, "Failed to enumerate interfaces"),
            }
            if attempt < attempts {
                sleep(self.config.enumeration_backoff()).await;
            }
        }
        None
    }

    async fn start_ap(&mut self, interface: &str) {
        self.transition(HotspotState::ApStarting);

        if let Err(e) = self.ownership.claim().await {
            warn!(error = %e, "Failed to write hotspot ownership marker");
        }
        if let Err(e) = self.platform.install_ap_config(interface).await {
            warn!(error = ?e, "Failed to install AP configuration");
        }
        for unit in &self.config.ap_services {
            for action in [UnitAction::Unmask, UnitAction::Start] {
                if let Err(e) = self.supervisor.apply(unit, action).await {
                    warn!(unit, %action, error = %e, "AP service transition failed");
                }
            }
        }

        match self.session {
            Some(ref mut session) => session.active = true,
            None => {
                self.session = Some(HotspotSession {
                    interface: interface.to_owned(),
                    active: true,
                    started_at: Local::now(),
                });
            }
        }
        info!(interface, "Hotspot up, waiting for configuration");
        self.transition(HotspotState::ApActive);
    }

    /// Frees the radio and lets the network service try the new credentials.
    async fn apply_credentials(&mut self) {
        self.stop_ap_services(false).await;
        if let Some(ref mut session) = self.session {
            session.active = false;
        }
        if let Err(e) = self
            .supervisor
            .apply(&self.config.network_service, UnitAction::Restart)
            .await
        {
            warn!(unit = %self.config.network_service, error = %e, "Failed to restart network service");
        }
        sleep(self.config.settle()).await;
    }

    async fn finish(&mut self, method: ProbeMethod, portal_rounds: u32) -> Connected {
        info!(%method, portal_rounds, "Network reachable again, tearing down hotspot");
        self.stop_ap_services(true).await;
        self.ownership.release().await;
        self.session = None;
        self.transition(HotspotState::Connected);
        Connected {
            method,
            hotspot_used: true,
            portal_rounds,
        }
    }

    /// Best effort: a unit left running is brought down again by the next hotspot run.
    async fn stop_ap_services(&self, mask: bool) {
        for unit in &self.config.ap_services {
            let actions: &[UnitAction] = if mask {
                &[UnitAction::Stop, UnitAction::Mask]
            } else {
                &[UnitAction::Stop]
            };
            for &action in actions {
                if let Err(e) = self.supervisor.apply(unit, action).await {
                    warn!(unit, %action, error = %e, "AP service cleanup failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::collections::VecDeque;
    use core::{cell::RefCell, time::Duration};

    use super::*;
    use crate::testing::{
        FakePlatform, FakeProbes, FakeSupervisor, test_hotspot_config, test_probe_config,
    };

    const AP_UNITS: [&str; 2] = ["hostapd.service", "dnsmasq.service"];

    fn controller<'fakes>(
        probes: &'fakes FakeProbes,
        supervisor: &'fakes FakeSupervisor,
        platform: &'fakes FakePlatform,
        config: HotspotConfig,
    ) -> HotspotController<&'fakes FakeProbes, &'fakes FakeSupervisor, &'fakes FakePlatform> {
        let prober = Prober::new(probes, &test_probe_config()).unwrap();
        HotspotController::new(prober, supervisor, platform, config)
    }

    #[tokio::test]
    async fn no_op_when_already_connected() {
        let dir = tempfile::tempdir().unwrap();
        let probes = FakeProbes::reachable_after(0);
        let supervisor = FakeSupervisor::default();
        let platform = FakePlatform::with_radio("wlan0");
        let mut ctl = controller(&probes, &supervisor, &platform, test_hotspot_config(dir.path()));

        let connected = ctl.ensure_connectivity().await.unwrap();

        assert!(!connected.hotspot_used, "hotspot must not be used");
        assert_eq!(connected.method, ProbeMethod::Gateway);
        assert_eq!(supervisor.action_count(), 0, "no AP service touched");
        assert_eq!(platform.enumerations.get(), 0, "no interface lookup needed");
        assert_eq!(ctl.state(), HotspotState::Connected);
    }

    #[tokio::test]
    async fn gives_up_without_gateway_or_radio() {
        let dir = tempfile::tempdir().unwrap();
        let probes = FakeProbes::default();
        let supervisor = FakeSupervisor::default();
        let platform = FakePlatform::default();
        let mut ctl = controller(&probes, &supervisor, &platform, test_hotspot_config(dir.path()));

        let gave_up = ctl.ensure_connectivity().await.unwrap_err();

        assert_eq!(
            gave_up,
            GaveUp::NoWirelessInterface {
                attempts: 5,
                preferred: None
            }
        );
        assert_eq!(platform.enumerations.get(), 5, "enumeration is retried");
        assert_eq!(supervisor.action_count(), 0, "no AP service touched");
        assert_eq!(ctl.state(), HotspotState::GaveUp);
        assert!(ctl.session().is_none(), "no session without radio");
        assert_eq!(crate::FatalError::from(gave_up).exit_code(), 1);
    }

    #[tokio::test]
    async fn converges_once_the_prober_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_hotspot_config(dir.path());
        let marker = config.ownership_marker.clone();
        // the first probe is the initial check, the next three happen in AP_ACTIVE
        let probes = FakeProbes::reachable_after(3);
        let supervisor = FakeSupervisor::default();
        let platform = FakePlatform::with_radio("wlan0");
        let mut ctl = controller(&probes, &supervisor, &platform, config);

        let connected = ctl.ensure_connectivity().await.unwrap();

        assert!(connected.hotspot_used, "hotspot was needed");
        assert_eq!(connected.portal_rounds, 3);
        assert_eq!(platform.portal_runs.get(), 3);
        assert_eq!(probes.probes_run(), 4);
        for unit in AP_UNITS {
            assert_eq!(supervisor.count(unit, UnitAction::Unmask), 1, "{unit}");
            assert_eq!(supervisor.count(unit, UnitAction::Start), 1, "{unit}");
            assert_eq!(supervisor.count(unit, UnitAction::Stop), 1, "{unit}");
            assert_eq!(supervisor.count(unit, UnitAction::Mask), 1, "{unit}");
        }
        let last = supervisor.actions.borrow().last().cloned();
        assert_eq!(
            last,
            Some(("dnsmasq.service".to_owned(), UnitAction::Mask)),
            "teardown masks last"
        );
        assert_eq!(platform.installs.borrow().as_slice(), ["wlan0".to_owned()]);
        assert!(!marker.exists(), "ownership released");
        assert!(ctl.session().is_none(), "session destroyed");
        assert_eq!(ctl.state(), HotspotState::Connected);
    }

    #[tokio::test]
    async fn submitted_credentials_are_tried_with_the_ap_down() {
        let dir = tempfile::tempdir().unwrap();
        let probes = FakeProbes::reachable_after(1);
        let supervisor = FakeSupervisor::default();
        let platform = FakePlatform {
            outcomes: RefCell::new(VecDeque::from([PortalOutcome::CredentialsSubmitted])),
            ..FakePlatform::with_radio("wlan0")
        };
        let mut ctl = controller(&probes, &supervisor, &platform, test_hotspot_config(dir.path()));

        let connected = ctl.ensure_connectivity().await.unwrap();

        assert_eq!(connected.portal_rounds, 1);
        assert_eq!(
            supervisor.count("NetworkManager.service", UnitAction::Restart),
            1
        );
        // stopped once to free the radio, once more during teardown
        assert_eq!(supervisor.count("hostapd.service", UnitAction::Stop), 2);
        assert_eq!(supervisor.count("hostapd.service", UnitAction::Mask), 1);
    }

    #[tokio::test]
    async fn failed_credentials_bring_the_ap_back() {
        let dir = tempfile::tempdir().unwrap();
        let probes = FakeProbes::reachable_after(3);
        let supervisor = FakeSupervisor::default();
        let platform = FakePlatform {
            outcomes: RefCell::new(VecDeque::from([
                PortalOutcome::CredentialsSubmitted,
                PortalOutcome::Exited,
            ])),
            ..FakePlatform::with_radio("wlan0")
        };
        let mut ctl = controller(&probes, &supervisor, &platform, test_hotspot_config(dir.path()));

        let connected = ctl.ensure_connectivity().await.unwrap();

        assert_eq!(connected.portal_rounds, 3);
        assert_eq!(supervisor.count("hostapd.service", UnitAction::Start), 2);
        assert_eq!(platform.installs.borrow().len(), 2, "config reinstalled");
    }

    #[tokio::test]
    async fn late_radio_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let probes = FakeProbes::reachable_after(1);
        let supervisor = FakeSupervisor::default();
        let platform = FakePlatform {
            late_by: 2,
            ..FakePlatform::with_radio("wlan0")
        };
        let mut ctl = controller(&probes, &supervisor, &platform, test_hotspot_config(dir.path()));

        let connected = ctl.ensure_connectivity().await.unwrap();

        assert!(connected.hotspot_used, "hotspot was needed");
        assert_eq!(platform.enumerations.get(), 3);
    }

    #[tokio::test]
    async fn preferred_interface_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let probes = FakeProbes::unreachable();
        let supervisor = FakeSupervisor::default();
        let platform = FakePlatform::with_radio("wlan0");
        let config = HotspotConfig {
            enumeration_attempts: 2,
            ..test_hotspot_config(dir.path())
        };
        let mut ctl = controller(&probes, &supervisor, &platform, config)
            .with_preferred_interface(Some("wlan1".to_owned()));

        let gave_up = ctl.ensure_connectivity().await.unwrap_err();

        assert_eq!(
            gave_up,
            GaveUp::NoWirelessInterface {
                attempts: 2,
                preferred: Some("wlan1".to_owned())
            }
        );
        assert!(!supervisor.touched("hostapd.service"), "no AP on the wrong radio");
    }

    #[tokio::test]
    async fn ap_service_failures_are_soft() {
        let dir = tempfile::tempdir().unwrap();
        let probes = FakeProbes::reachable_after(2);
        let supervisor = FakeSupervisor::default();
        supervisor
            .failing_units
            .borrow_mut()
            .insert("hostapd.service".to_owned());
        let platform = FakePlatform::with_radio("wlan0");
        let mut ctl = controller(&probes, &supervisor, &platform, test_hotspot_config(dir.path()));

        let connected = ctl.ensure_connectivity().await.unwrap();

        assert_eq!(connected.portal_rounds, 2);
        assert_eq!(supervisor.count("dnsmasq.service", UnitAction::Start), 1);
        assert_eq!(
            supervisor.count("hostapd.service", UnitAction::Mask),
            1,
            "cleanup still attempted"
        );
    }

    #[tokio::test]
    async fn stale_marker_is_cleared_when_already_connected() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_hotspot_config(dir.path());
        let marker = config.ownership_marker.clone();
        std::fs::write(&marker, format!("pid={}\n", i32::MAX)).unwrap();
        let probes = FakeProbes::reachable_after(0);
        let supervisor = FakeSupervisor::default();
        let platform = FakePlatform::with_radio("wlan0");
        let mut ctl = controller(&probes, &supervisor, &platform, config);

        let connected = ctl.ensure_connectivity().await.unwrap();

        assert!(!connected.hotspot_used, "hotspot must not be used");
        assert!(!marker.exists(), "leftover marker of a dead hotspot removed");
        assert_eq!(supervisor.action_count(), 0, "no AP service touched");
    }

    #[tokio::test(start_paused = true)]
    async fn exited_captive_app_is_restarted_after_a_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let config = HotspotConfig {
            portal_retry_backoff_secs: 5,
            ..test_hotspot_config(dir.path())
        };
        let probes = FakeProbes::reachable_after(3);
        let supervisor = FakeSupervisor::default();
        let platform = FakePlatform::with_radio("wlan0");
        let mut ctl = controller(&probes, &supervisor, &platform, config);

        let started = tokio::time::Instant::now();
        let connected = ctl.ensure_connectivity().await.unwrap();

        assert_eq!(connected.portal_rounds, 3);
        assert_eq!(platform.portal_runs.get(), 3);
        assert!(
            started.elapsed() >= Duration::from_secs(10),
            "two restarts must wait 5s each, took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn session_tracks_the_running_ap() {
        let dir = tempfile::tempdir().unwrap();
        let probes = FakeProbes::unreachable();
        let supervisor = FakeSupervisor::default();
        let platform = FakePlatform::with_radio("wlan0");
        let mut ctl = controller(&probes, &supervisor, &platform, test_hotspot_config(dir.path()));

        ctl.start_ap("wlan0").await;

        let session = ctl.session().cloned().unwrap();
        assert_eq!(session.interface, "wlan0");
        assert!(session.active, "AP running");
        assert_eq!(ctl.state(), HotspotState::ApActive);

        ctl.apply_credentials().await;
        assert!(!ctl.session().unwrap().active, "AP stopped while trying credentials");
    }
}
