//! Scripted fakes of the OS seams, shared by the unit tests.

use alloc::collections::{BTreeSet, VecDeque};
use core::{
    cell::{Cell, RefCell},
    future,
    net::{IpAddr, Ipv4Addr},
};
use std::{collections::HashMap, io, path::Path};

use netwarden_common::{ServiceSupervisor, SupervisorError, UnitAction, UnitState, instance_name};

use crate::{
    config::{HotspotConfig, ProbeConfig},
    hotspot::{HotspotPlatform, PortalOutcome},
    probe::NetworkProbes,
};

pub(crate) const GATEWAY: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));
pub(crate) const PUBLIC_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));

pub(crate) fn test_probe_config() -> ProbeConfig {
    ProbeConfig {
        public_ip: PUBLIC_IP.to_string(),
        http_url: "http://connectivity.invalid/".to_owned(),
        ..ProbeConfig::default()
    }
}

/// Hotspot settings with all delays zeroed and all files below `dir`.
pub(crate) fn test_hotspot_config(dir: &Path) -> HotspotConfig {
    HotspotConfig {
        templates: Vec::new(),
        sentinel: dir.join("hotspot.configured"),
        ownership_marker: dir.join("hotspot.owner"),
        sysfs_net: dir.join("net"),
        enumeration_backoff_secs: 0,
        settle_secs: 0,
        portal_retry_backoff_secs: 0,
        ..HotspotConfig::default()
    }
}

/// Network probes answering according to fixed flags, or to a per-probe script.
///
/// Each probe starts with a gateway lookup; when `script` is not empty its front
/// entry decides whether the gateway answers during that probe.
#[derive(Debug, Default)]
pub(crate) struct FakeProbes {
    pub gateway: Option<IpAddr>,
    pub gateway_answers: bool,
    pub public_answers: bool,
    pub http_answers: bool,
    /// Every step blocks forever.
    pub hang: bool,
    pub script: RefCell<VecDeque<bool>>,
    pub current: Cell<bool>,
    pub gateway_lookups: Cell<u32>,
    pub gateway_pings: Cell<u32>,
    pub public_pings: Cell<u32>,
    pub http_checks: Cell<u32>,
}

impl FakeProbes {
    /// Probes where only the gateway matters, failing for the first `failures` probes.
    pub(crate) fn reachable_after(failures: usize) -> Self {
        Self {
            gateway: Some(GATEWAY),
            gateway_answers: true,
            script: RefCell::new(core::iter::repeat_n(false, failures).collect()),
            ..Self::default()
        }
    }

    /// Probes that never reach anything.
    pub(crate) fn unreachable() -> Self {
        Self {
            gateway: Some(GATEWAY),
            ..Self::default()
        }
    }

    pub(crate) fn probes_run(&self) -> u32 {
        self.gateway_lookups.get()
    }

    async fn maybe_hang(&self) {
        if self.hang {
            future::pending::<()>().await;
        }
    }
}

impl NetworkProbes for FakeProbes {
    async fn default_gateway(&self) -> Option<IpAddr> {
        self.gateway_lookups.set(self.gateway_lookups.get() + 1);
        let scripted = self.script.borrow_mut().pop_front();
        self.current.set(scripted.unwrap_or(self.gateway_answers));
        self.gateway
    }

    async fn ping(&self, target: IpAddr) -> bool {
        self.maybe_hang().await;
        if Some(target) == self.gateway {
            self.gateway_pings.set(self.gateway_pings.get() + 1);
            self.current.get()
        } else {
            self.public_pings.set(self.public_pings.get() + 1);
            self.public_answers
        }
    }

    async fn http_check(&self, _url: &str) -> bool {
        self.maybe_hang().await;
        self.http_checks.set(self.http_checks.get() + 1);
        self.http_answers
    }
}

/// Supervisor recording every request and keeping a tiny model of unit state.
#[derive(Debug)]
pub(crate) struct FakeSupervisor {
    pub template: String,
    pub actions: RefCell<Vec<(String, UnitAction)>>,
    pub states: RefCell<HashMap<String, UnitState>>,
    pub enabled: RefCell<BTreeSet<String>>,
    pub failing_units: RefCell<BTreeSet<String>>,
    pub reboots: Cell<u32>,
}

impl Default for FakeSupervisor {
    fn default() -> Self {
        Self {
            template: "avahi-alias@".to_owned(),
            actions: RefCell::default(),
            states: RefCell::default(),
            enabled: RefCell::default(),
            failing_units: RefCell::default(),
            reboots: Cell::new(0),
        }
    }
}

impl FakeSupervisor {
    pub(crate) fn with_enabled(instances: &[&str]) -> Self {
        let supervisor = Self::default();
        supervisor
            .enabled
            .borrow_mut()
            .extend(instances.iter().map(|&i| i.to_owned()));
        supervisor
    }

    pub(crate) fn action_count(&self) -> usize {
        self.actions.borrow().len()
    }

    pub(crate) fn count(&self, unit: &str, action: UnitAction) -> usize {
        self.actions
            .borrow()
            .iter()
            .filter(|&&(ref u, a)| u == unit && a == action)
            .count()
    }

    pub(crate) fn touched(&self, unit: &str) -> bool {
        self.actions.borrow().iter().any(|&(ref u, _)| u == unit)
    }
}

impl ServiceSupervisor for FakeSupervisor {
    async fn apply(&self, unit: &str, action: UnitAction) -> Result<(), SupervisorError> {
        self.actions.borrow_mut().push((unit.to_owned(), action));
        if self.failing_units.borrow().contains(unit) {
            return Err(SupervisorError::Spawn {
                args: format!("{action} {unit}"),
                source: io::Error::other("scripted failure"),
            });
        }
        if let Some(instance) = instance_name(unit, &self.template) {
            match action {
                UnitAction::Enable => {
                    self.enabled.borrow_mut().insert(instance.to_owned());
                }
                UnitAction::Disable => {
                    self.enabled.borrow_mut().remove(instance);
                }
                _ => {}
            }
        }
        let state = match action {
            UnitAction::Start | UnitAction::Restart => Some(UnitState::Active),
            UnitAction::Stop => Some(UnitState::Inactive),
            _ => None,
        };
        if let Some(state) = state {
            self.states.borrow_mut().insert(unit.to_owned(), state);
        }
        Ok(())
    }

    async fn state(&self, unit: &str) -> UnitState {
        self.states
            .borrow()
            .get(unit)
            .copied()
            .unwrap_or(UnitState::Inactive)
    }

    async fn enabled_instances(&self, _template: &str) -> Result<BTreeSet<String>, SupervisorError> {
        Ok(self.enabled.borrow().clone())
    }

    async fn reboot(&self) -> Result<(), SupervisorError> {
        self.reboots.set(self.reboots.get() + 1);
        Ok(())
    }
}

/// Hotspot platform with a scripted radio and captive app.
#[derive(Debug, Default)]
pub(crate) struct FakePlatform {
    pub interfaces: Vec<String>,
    /// Number of enumerations that come back empty before `interfaces` shows up.
    pub late_by: u32,
    pub enumerations: Cell<u32>,
    pub installs: RefCell<Vec<String>>,
    pub portal_runs: Cell<u32>,
    /// Outcomes of consecutive portal runs, `Exited` once exhausted.
    pub outcomes: RefCell<VecDeque<PortalOutcome>>,
}

impl FakePlatform {
    pub(crate) fn with_radio(name: &str) -> Self {
        Self {
            interfaces: vec![name.to_owned()],
            ..Self::default()
        }
    }
}

impl HotspotPlatform for FakePlatform {
    async fn wireless_interfaces(&self) -> io::Result<Vec<String>> {
        let seen = self.enumerations.get();
        self.enumerations.set(seen + 1);
        Ok(if seen < self.late_by {
            Vec::new()
        } else {
            self.interfaces.clone()
        })
    }

    async fn install_ap_config(&self, interface: &str) -> eyre::Result<()> {
        self.installs.borrow_mut().push(interface.to_owned());
        Ok(())
    }

    async fn run_captive_portal(&self, _interface: &str) -> eyre::Result<PortalOutcome> {
        self.portal_runs.set(self.portal_runs.get() + 1);
        Ok(self
            .outcomes
            .borrow_mut()
            .pop_front()
            .unwrap_or(PortalOutcome::Exited))
    }
}
