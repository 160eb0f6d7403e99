// src/config/validate.rs

use crate::config::model::{LanedagConfig, RawConfigFile};
use crate::errors::{LanedagError, Result};

impl TryFrom<RawConfigFile> for LanedagConfig {
    type Error = LanedagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(LanedagConfig::new_unchecked(raw.scheduler, raw.lanes))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_scheduler(cfg)?;
    validate_lanes(cfg)?;
    Ok(())
}

fn validate_scheduler(cfg: &RawConfigFile) -> Result<()> {
    // lane_policy is strongly typed and rejected during deserialization.

    if cfg.scheduler.max_cached_nodes == 0 {
        return Err(LanedagError::ConfigError(
            "[scheduler].max_cached_nodes must be >= 1 (got 0)".to_string(),
        ));
    }

    if let Some(device) = cfg.scheduler.default_device {
        if device.is_host() {
            return Err(LanedagError::ConfigError(format!(
                "[scheduler].default_device cannot be the host ({device})"
            )));
        }
    }

    Ok(())
}

fn validate_lanes(cfg: &RawConfigFile) -> Result<()> {
    if cfg.lanes.memcpy == 0 {
        return Err(LanedagError::ConfigError(
            "[lanes].memcpy must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.lanes.kernel == 0 {
        return Err(LanedagError::ConfigError(
            "[lanes].kernel must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}
