//! Configuration file handling for tusup

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tusup_client::ClientConfig;

/// Load client configuration from an explicit path or the default location.
///
/// `.yaml`/`.yml` files are parsed as YAML, anything else as TOML. A missing
/// default file yields the built-in defaults.
pub fn load(path: Option<&Path>) -> Result<ClientConfig> {
    match path {
        Some(path) => load_from(path),
        None => {
            let default_path = config_path()?;
            if default_path.exists() {
                load_from(&default_path)
            } else {
                Ok(ClientConfig::default())
            }
        }
    }
}

/// Load configuration from a specific path
pub fn load_from(path: &Path) -> Result<ClientConfig> {
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    if is_yaml {
        ClientConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    } else {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

/// Get the default config file path
pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not determine config directory")?
        .join("tusup");

    Ok(config_dir.join("config.toml"))
}

/// Apply command-line overrides on top of file values
pub fn merge_with_args(mut config: ClientConfig, chunk_size: Option<u64>) -> ClientConfig {
    if chunk_size.is_some() {
        config.chunk_size = chunk_size;
    }
    config
}
