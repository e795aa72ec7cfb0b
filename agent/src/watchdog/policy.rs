//! Escalation table mapping consecutive failures to remediation.

use core::fmt;

use thiserror::Error as ThisError;

use crate::config::WatchdogConfig;

/// What the watchdog does about a failed poll. Ordered by disruptiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum RemediationAction {
    #[default]
    None,
    RestartNetworkService,
    Reboot,
}

impl fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::None => "none",
            Self::RestartNetworkService => "restart-network-service",
            Self::Reboot => "reboot",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum PolicyError {
    #[error("Escalation thresholds must be at least 1")]
    ZeroThreshold,
    #[error("Escalation thresholds must strictly increase, {next} follows {previous}")]
    ThresholdsNotIncreasing { previous: u32, next: u32 },
    #[error("Escalation actions must get more disruptive, {next} follows {previous}")]
    ActionsNotEscalating {
        previous: RemediationAction,
        next: RemediationAction,
    },
    #[error("Escalation step at {threshold} does nothing")]
    NoAction { threshold: u32 },
}

/// Ordered `(threshold, action)` steps.
///
/// An action fires exactly when the failure count equals its threshold, so a
/// count past the last threshold does nothing until the ladder resets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationPolicy {
    steps: Vec<(u32, RemediationAction)>,
}

impl EscalationPolicy {
    /// # Errors
    ///
    /// Returns an error if a threshold is zero, thresholds or actions do not
    /// strictly increase, or a step has no action.
    pub fn new(steps: Vec<(u32, RemediationAction)>) -> Result<Self, PolicyError> {
        let mut previous: Option<(u32, RemediationAction)> = None;
        for &(threshold, action) in &steps {
            if threshold == 0 {
                return Err(PolicyError::ZeroThreshold);
            }
            if action == RemediationAction::None {
                return Err(PolicyError::NoAction { threshold });
            }
            if let Some((prev_threshold, prev_action)) = previous {
                if threshold <= prev_threshold {
                    return Err(PolicyError::ThresholdsNotIncreasing {
                        previous: prev_threshold,
                        next: threshold,
                    });
                }
                if action <= prev_action {
                    return Err(PolicyError::ActionsNotEscalating {
                        previous: prev_action,
                        next: action,
                    });
                }
            }
            previous = Some((threshold, action));
        }
        Ok(Self { steps })
    }

    /// Restart networking at `restart_threshold`, reboot at `reboot_threshold`.
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn from_config(config: &WatchdogConfig) -> Result<Self, PolicyError> {
        Self::new(vec![
            (
                config.restart_threshold,
                RemediationAction::RestartNetworkService,
            ),
            (config.reboot_threshold, RemediationAction::Reboot),
        ])
    }

    /// The action due at exactly `consecutive_failures` failures.
    #[must_use]
    pub fn action_for(&self, consecutive_failures: u32) -> Option<RemediationAction> {
        self.steps
            .iter()
            .find(|&&(threshold, _)| threshold == consecutive_failures)
            .map(|&(_, action)| action)
    }
}
