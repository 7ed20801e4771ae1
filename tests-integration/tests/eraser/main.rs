//! End-to-end tests for the data eraser thread against real log files.

mod invariants;
mod recovery;
mod scenarios;

use std::time::Duration;

use common::config::EraserConfig;
use common::testing::TestConfigBuilder;

pub const PERIOD: Duration = Duration::from_secs(30 * 60);

/// Erasure enabled with a 30 minute period.
pub fn enabled() -> EraserConfig {
    TestConfigBuilder::new().with_period(PERIOD).build_eraser()
}
