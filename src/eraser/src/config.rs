//! Versioned runtime configuration.
//!
//! The eraser thread never observes a half-applied change: every update
//! installs a new immutable [`ConfigSnapshot`], and the thread picks up the
//! latest snapshot at cycle start, before each file and at throttle
//! checkpoints.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use common::config::EraserConfig;

/// One immutable configuration version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub config: EraserConfig,
}

impl ConfigSnapshot {
    pub fn effective_period(&self) -> Option<Duration> {
        self.config.effective_period()
    }
}

#[derive(Debug)]
pub struct ConfigHandle {
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfigHandle {
    pub fn new(config: EraserConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(ConfigSnapshot { version: 1, config })),
        }
    }

    /// The most recently installed snapshot.
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Installs `config` as a new version and returns that version.
    pub fn update(&self, config: EraserConfig) -> u64 {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let version = guard.version + 1;
        *guard = Arc::new(ConfigSnapshot { version, config });
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_bumps_version() {
        let handle = ConfigHandle::new(EraserConfig::default());
        let before = handle.current();
        assert_eq!(before.version, 1);

        let version = handle.update(EraserConfig {
            enabled: true,
            period: Duration::from_secs(60),
            ..Default::default()
        });
        assert_eq!(version, 2);

        let after = handle.current();
        assert_eq!(after.effective_period(), Some(Duration::from_secs(60)));
        // Readers holding the old snapshot keep seeing it unchanged.
        assert_eq!(before.effective_period(), None);
    }
}
