//! Configuration loading utilities.

use std::{
    env,
    path::{Path, PathBuf},
};

use eyre::WrapErr as _;
use tokio::fs;
use tracing::info;

use crate::config::NetwardenConfig;

/// Path used when `NETWARDEN_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/netwarden/netwarden.toml";

/// Environment variable overriding the config file location.
pub const CONFIG_ENV_VAR: &str = "NETWARDEN_CONFIG";

/// Resolves the config file location from the environment.
#[must_use]
pub fn config_path() -> PathBuf {
    env::var_os(CONFIG_ENV_VAR).map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Reads and parses the config from a TOML file.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed.
pub async fn load<P: AsRef<Path>>(path: P) -> eyre::Result<NetwardenConfig> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(path_ref).await.wrap_err(format!(
        "Failed to read config file at: {}",
        path_ref.display()
    ))?;
    parse(&content).wrap_err(format!(
        "Failed to parse config as TOML at: {}",
        path_ref.display()
    ))
}

/// Like [`load`], but a missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub async fn load_or_default<P: AsRef<Path>>(path: P) -> eyre::Result<NetwardenConfig> {
    let path_ref = path.as_ref();
    match fs::try_exists(path_ref).await {
        Ok(true) => load(path_ref).await,
        Ok(false) => {
            info!(path = %path_ref.display(), "No config file, using defaults");
            Ok(NetwardenConfig::default())
        }
        Err(e) => Err(e).wrap_err(format!("Cannot access config at: {}", path_ref.display())),
    }
}

fn parse(content: &str) -> Result<NetwardenConfig, toml::de::Error> {
    toml::from_str(content)
}
