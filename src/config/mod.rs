// src/config/mod.rs

//! Configuration loading and validation for lanedag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk or a string (`loader.rs`).
//! - Validate basic invariants like non-empty lane ranges (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_from_str};
pub use model::{
    DEFAULT_MAX_CACHED_NODES, LaneSection, LanedagConfig, RawConfigFile, SchedulerSection,
};
