// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! Contract violations (a node without a lane, an executor asked to run a
//! raw memory requirement, a device with no executor) are not represented
//! here: they panic at the point of detection.

use thiserror::Error;

use crate::types::{DeviceId, NodeId};

#[derive(Error, Debug)]
pub enum LanedagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// The queue factory could not construct a queue for a lane.
    #[error("Failed to create queue for {device}: {reason}")]
    QueueCreation { device: DeviceId, reason: String },

    /// A native queue rejected an operation.
    #[error("Submission of {node} failed: {reason}")]
    Submission { node: NodeId, reason: String },

    /// The flush worker is gone (shut down or panicked).
    #[error("Flush worker is not running")]
    WorkerUnavailable,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, LanedagError>;
