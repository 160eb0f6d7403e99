// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{LanedagConfig, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Deserialize a raw configuration from TOML text.
pub fn load_from_str(contents: &str) -> Result<RawConfigFile> {
    let config: RawConfigFile = toml::from_str(contents)?;
    Ok(config)
}

/// Load a configuration file from path and run validation.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks flush threshold and lane counts.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<LanedagConfig> {
    let raw_config = load_from_path(&path)?;
    let config = LanedagConfig::try_from(raw_config)?;
    Ok(config)
}

/// Default config location: `LANEDAG_CONFIG` if set, otherwise
/// `Lanedag.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    std::env::var_os("LANEDAG_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("Lanedag.toml"))
}
