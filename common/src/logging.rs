//! Tracing setup shared by all netwarden components.
//!
//! Every binary writes timestamped lines to the same destination, either
//! stderr (picked up by the journal) or an append-only log file.

use std::{
    fs::OpenOptions,
    io,
    path::Path,
    sync::{Mutex, Once},
};

use eyre::WrapErr as _;
use serde::Deserialize;
use tracing_subscriber::{
    EnvFilter,
    fmt::{time::ChronoLocal, writer::BoxMakeWriter},
};

static INIT_TRACING: Once = Once::new();

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human readable output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
    /// Multi-line human readable output.
    Pretty,
}

/// Installs the global tracing subscriber.
///
/// The filter is read from `RUST_LOG` and falls back to `info`. When `file` is
/// given, lines are appended to it without ANSI colouring so multiple
/// components can share one log. Subsequent calls are no-ops.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened for appending.
pub fn init(format: LogFormat, file: Option<&Path>) -> eyre::Result<()> {
    let file = file
        .map(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .wrap_err(format!("Failed to open log file at: {}", path.display()))
        })
        .transpose()?;

    INIT_TRACING.call_once(move || {
        let ansi = file.is_none();
        let writer = match file {
            Some(file) => BoxMakeWriter::new(Mutex::new(file)),
            None => BoxMakeWriter::new(io::stderr),
        };

        let builder = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_timer(ChronoLocal::rfc_3339())
            .with_ansi(ansi)
            .with_writer(writer);

        match format {
            LogFormat::Compact => builder.compact().init(),
            LogFormat::Json => builder.json().init(),
            LogFormat::Pretty => builder.pretty().init(),
        }
    });

    Ok(())
}
