#![allow(dead_code)]

pub use lanedag_test_utils::builders;
pub use lanedag_test_utils::fake_queue;
pub use lanedag_test_utils::{init_tracing, with_timeout};
