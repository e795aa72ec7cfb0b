//! Errors that end a binary with a non-zero exit code.

use core::error::Error;

use thiserror::Error as ThisError;

use crate::{aliases::AliasError, hotspot::GaveUp, watchdog::PolicyError};

/// Exit code for every fatal precondition failure.
pub const EXIT_CODE: u8 = 1;

#[derive(Debug, ThisError)]
pub enum FatalError {
    #[error("This command must be run as root")]
    NotRoot,
    #[error(transparent)]
    GaveUp(#[from] GaveUp),
    #[error(transparent)]
    Alias(#[from] AliasError),
    #[error("Invalid watchdog thresholds")]
    Policy(#[from] PolicyError),
    #[error("{0:#}")]
    Setup(eyre::Report),
}

impl From<eyre::Report> for FatalError {
    fn from(report: eyre::Report) -> Self {
        Self::Setup(report)
    }
}

impl FatalError {
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        EXIT_CODE
    }

    /// The message followed by every source, joined with `: `.
    #[must_use]
    pub fn chain(&self) -> String {
        let mut message = self.to_string();
        let mut source = Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}
