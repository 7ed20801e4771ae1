//! Common utilities for the eraser integration tests.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use tracing_subscriber::EnvFilter;

pub mod fixtures;
pub mod generators;

/// How long a scenario may take in real time before it is considered stuck.
pub const SCENARIO_DEADLINE: Duration = Duration::from_secs(20);

/// Initialize test logging
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("eraser=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds or [`SCENARIO_DEADLINE`] passes.
pub fn wait_for(what: &str, mut condition: impl FnMut() -> bool) -> Result<()> {
    let deadline = Instant::now() + SCENARIO_DEADLINE;
    while !condition() {
        if Instant::now() >= deadline {
            bail!("Timed out waiting for {what}");
        }
        thread::sleep(Duration::from_millis(2));
    }
    Ok(())
}
