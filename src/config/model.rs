// src/config/model.rs

use serde::Deserialize;

use crate::types::{DeviceId, LanePolicy};

/// Pending node count above which a build guard triggers an automatic flush.
pub const DEFAULT_MAX_CACHED_NODES: usize = 100;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [scheduler]
/// max_cached_nodes = 100
/// lane_policy = "round_robin"
/// profiling = false
/// default_device = { backend = 1, index = 0 }
///
/// [lanes]
/// memcpy = 2
/// kernel = 4
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub lanes: LaneSection,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Flush automatically once the builder holds more nodes than this.
    #[serde(default = "default_max_cached_nodes")]
    pub max_cached_nodes: usize,

    /// Lane selection when no predecessor affinity applies.
    #[serde(default)]
    pub lane_policy: LanePolicy,

    /// Record an event before every submitted node.
    #[serde(default)]
    pub profiling: bool,

    /// Placement for nodes that have neither a device binding nor anything
    /// to inherit one from. `None` means "first device of the first executor".
    #[serde(default)]
    pub default_device: Option<DeviceId>,
}

fn default_max_cached_nodes() -> usize {
    DEFAULT_MAX_CACHED_NODES
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_cached_nodes: default_max_cached_nodes(),
            lane_policy: LanePolicy::default(),
            profiling: false,
            default_device: None,
        }
    }
}

/// `[lanes]` section: lanes created per device by multi-queue executors.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LaneSection {
    #[serde(default = "default_memcpy_lanes")]
    pub memcpy: usize,

    #[serde(default = "default_kernel_lanes")]
    pub kernel: usize,
}

fn default_memcpy_lanes() -> usize {
    2
}

fn default_kernel_lanes() -> usize {
    4
}

impl Default for LaneSection {
    fn default() -> Self {
        Self {
            memcpy: default_memcpy_lanes(),
            kernel: default_kernel_lanes(),
        }
    }
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`
/// (see `validate.rs`) or `Default`.
#[derive(Debug, Clone)]
pub struct LanedagConfig {
    pub scheduler: SchedulerSection,
    pub lanes: LaneSection,
}

impl LanedagConfig {
    pub(crate) fn new_unchecked(scheduler: SchedulerSection, lanes: LaneSection) -> Self {
        Self { scheduler, lanes }
    }
}

impl Default for LanedagConfig {
    fn default() -> Self {
        Self::new_unchecked(SchedulerSection::default(), LaneSection::default())
    }
}
