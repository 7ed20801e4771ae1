//! Test configuration builder for creating test setups quickly.

use std::path::Path;
use std::time::Duration;

use crate::config::{Configuration, EraserConfig};

/// Builder for creating test configurations.
///
/// Starts from the defaults with erasure turned off; each method switches on
/// one aspect.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// let config = TestConfigBuilder::new()
///     .with_log_dir(temp.path())
///     .with_period(Duration::from_secs(30 * 60))
///     .erase_all_obsolete()
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Configuration::default(),
        }
    }

    /// Point the log and state directories below `dir`.
    pub fn in_dir(mut self, dir: &Path) -> Self {
        self.config.log.dir = dir.join("log");
        self.config.state.dir = dir.join("meta");
        self
    }

    /// Set the log directory.
    pub fn with_log_dir(mut self, dir: &Path) -> Self {
        self.config.log.dir = dir.to_path_buf();
        self
    }

    /// Enable erasure with the given period.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.config.eraser.enabled = true;
        self.config.eraser.period = period;
        self
    }

    /// Force a period without the explicit enable flag.
    pub fn with_test_period(mut self, period: Duration) -> Self {
        self.config.eraser.test_period = Some(period);
        self
    }

    /// Turn on tree-lookup based erasure (implies every other switch).
    pub fn erase_all_obsolete(mut self) -> Self {
        self.config.eraser.erase_all_obsolete = true;
        self
    }

    /// Set the abort timeout.
    pub fn with_abort_timeout(mut self, timeout: Duration) -> Self {
        self.config.eraser.abort_timeout = timeout;
        self
    }

    /// Set the look-ahead cache size in bytes.
    pub fn with_lookahead_cache_size(mut self, bytes: usize) -> Self {
        self.config.eraser.lookahead_cache_size = bytes;
        self
    }

    /// Set the number of erased entries per durability batch.
    pub fn with_max_batch_entries(mut self, entries: usize) -> Self {
        self.config.eraser.max_batch_entries = entries;
        self
    }

    /// Build the eraser section only.
    pub fn build_eraser(self) -> EraserConfig {
        self.config.eraser
    }

    /// Build the configuration.
    pub fn build(self) -> Configuration {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_builder() {
        let config = TestConfigBuilder::new().build();
        assert!(!config.eraser.is_enabled());
    }

    #[test]
    fn test_in_dir() {
        let config = TestConfigBuilder::new().in_dir(Path::new("/tmp/x")).build();
        assert_eq!(config.log.dir, Path::new("/tmp/x/log"));
        assert_eq!(config.state.dir, Path::new("/tmp/x/meta"));
    }

    #[test]
    fn test_with_period_enables() {
        let eraser = TestConfigBuilder::new()
            .with_period(Duration::from_secs(1800))
            .erase_all_obsolete()
            .build_eraser();
        assert_eq!(eraser.effective_period(), Some(Duration::from_secs(1800)));
        assert!(eraser.erases_all_obsolete());
    }

    #[test]
    fn test_with_test_period() {
        let eraser = TestConfigBuilder::new()
            .with_test_period(Duration::from_millis(500))
            .build_eraser();
        assert!(!eraser.enabled);
        assert!(eraser.is_enabled());
    }
}
