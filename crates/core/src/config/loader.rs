//! Configuration file loader for the `.reelsmith/` directory.

use crate::config::error::{ConfigError, ConfigResult};
use crate::config::models::EngineConfig;
use std::path::Path;

/// Loads engine configuration from `<root>/.reelsmith/config.toml`.
///
/// A missing directory or file yields `EngineConfig::default()`. A file that
/// exists but cannot be read or parsed, or whose values are inconsistent
/// (e.g. an inverted word-count range), is a `ConfigError`.
pub async fn load_config(root: &Path) -> ConfigResult<EngineConfig> {
    let config_path = root.join(".reelsmith").join("config.toml");

    if !config_path.exists() {
        return Ok(EngineConfig::default());
    }

    let content =
        std::fs::read_to_string(&config_path).map_err(|source| ConfigError::FileRead {
            path: config_path.clone(),
            source,
        })?;

    let config: EngineConfig =
        toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
            path: config_path.clone(),
            source,
        })?;

    config
        .validate()
        .map_err(|reason| ConfigError::InvalidConfig {
            path: config_path,
            reason,
        })?;

    Ok(config)
}
