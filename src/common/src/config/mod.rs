use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

pub const DEFAULT_CONFIG_FILE: &str = "eraserdb.toml";
pub const ENV_PREFIX: &str = "ERASERDB__";

/// Location of the engine's log files.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory holding the `*.jdb` log files
    pub dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".data/log"),
        }
    }
}

/// Location of the eraser's persisted cycle state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory of the file-backed metadata store
    pub dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".data/meta"),
        }
    }
}

/// Data eraser configuration. Every field may change while the eraser runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraserConfig {
    /// Enable erasure.
    ///
    /// Env: ERASERDB__ERASER__ENABLED
    #[serde(default)]
    pub enabled: bool,

    /// Length of one erasure cycle. Files at least this old at cycle start are
    /// erased before the cycle ends. Zero disables erasure.
    ///
    /// Env: ERASERDB__ERASER__PERIOD
    #[serde(with = "humantime_serde", default)]
    pub period: Duration,

    /// Erase every entry of databases that have been removed.
    ///
    /// Env: ERASERDB__ERASER__ERASE_DELETED_DATABASES
    #[serde(default = "default_true")]
    pub erase_deleted_databases: bool,

    /// Erase records the application has declared extinct.
    ///
    /// Env: ERASERDB__ERASER__ERASE_EXTINCT_RECORDS
    #[serde(default = "default_true")]
    pub erase_extinct_records: bool,

    /// Erase entries already known to be obsolete: tracked obsolete offsets,
    /// deletion markers, immediately obsolete records and expired records.
    ///
    /// Env: ERASERDB__ERASER__ERASE_KNOWN_OBSOLETE
    #[serde(default = "default_true")]
    pub erase_known_obsolete: bool,

    /// Also prove obsolescence with tree lookups. Implies the three switches above.
    ///
    /// Env: ERASERDB__ERASER__ERASE_ALL_OBSOLETE
    #[serde(default)]
    pub erase_all_obsolete: bool,

    /// How long an external actor waits for the eraser to let go of a file.
    ///
    /// Env: ERASERDB__ERASER__ABORT_TIMEOUT
    #[serde(with = "humantime_serde", default = "default_abort_timeout")]
    pub abort_timeout: Duration,

    /// Bytes of leaf records buffered while waiting for a shared tree lookup.
    ///
    /// Env: ERASERDB__ERASER__LOOKAHEAD_CACHE_SIZE
    #[serde(default = "default_lookahead_cache_size")]
    pub lookahead_cache_size: usize,

    /// Extra time after a record's expiration before it may be erased.
    ///
    /// Env: ERASERDB__ERASER__EXPIRATION_GRACE
    #[serde(with = "humantime_serde", default = "default_expiration_grace")]
    pub expiration_grace: Duration,

    /// Maximum number of erased entries rewritten per durability batch.
    ///
    /// Env: ERASERDB__ERASER__MAX_BATCH_ENTRIES
    #[serde(default = "default_max_batch_entries")]
    pub max_batch_entries: usize,

    /// Test-only: forces this period even when `enabled` is false.
    #[serde(with = "humantime_serde", default, skip_serializing_if = "Option::is_none")]
    pub test_period: Option<Duration>,
}

fn default_true() -> bool {
    true
}

fn default_abort_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_lookahead_cache_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_expiration_grace() -> Duration {
    Duration::from_secs(3600)
}

fn default_max_batch_entries() -> usize {
    1000
}

impl Default for EraserConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period: Duration::ZERO,
            erase_deleted_databases: true,
            erase_extinct_records: true,
            erase_known_obsolete: true,
            erase_all_obsolete: false,
            abort_timeout: default_abort_timeout(),
            lookahead_cache_size: default_lookahead_cache_size(),
            expiration_grace: default_expiration_grace(),
            max_batch_entries: default_max_batch_entries(),
            test_period: None,
        }
    }
}

impl EraserConfig {
    /// The period erasure runs with, or `None` when erasure is off.
    pub fn effective_period(&self) -> Option<Duration> {
        if let Some(period) = self.test_period
            && !period.is_zero()
        {
            return Some(period);
        }
        (self.enabled && !self.period.is_zero()).then_some(self.period)
    }

    pub fn is_enabled(&self) -> bool {
        self.effective_period().is_some()
    }

    pub fn erases_deleted_databases(&self) -> bool {
        self.erase_deleted_databases || self.erase_all_obsolete
    }

    pub fn erases_extinct_records(&self) -> bool {
        self.erase_extinct_records || self.erase_all_obsolete
    }

    pub fn erases_known_obsolete(&self) -> bool {
        self.erase_known_obsolete || self.erase_all_obsolete
    }

    pub fn erases_all_obsolete(&self) -> bool {
        self.erase_all_obsolete
    }

    /// Validate the eraser configuration.
    ///
    /// Checks:
    /// - Abort timeout is positive
    /// - Look-ahead cache and batch bounds are positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.abort_timeout.is_zero() {
            return Err(ConfigError::InvalidDuration {
                field: "abort_timeout",
                duration: self.abort_timeout,
            });
        }
        if self.lookahead_cache_size == 0 {
            return Err(ConfigError::InvalidSize {
                field: "lookahead_cache_size",
            });
        }
        if self.max_batch_entries == 0 {
            return Err(ConfigError::InvalidSize {
                field: "max_batch_entries",
            });
        }
        Ok(())
    }
}

/// Errors that can occur while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {field}: {duration:?} must be positive")]
    InvalidDuration {
        field: &'static str,
        duration: Duration,
    },

    #[error("Invalid {field}: must be positive")]
    InvalidSize { field: &'static str },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Log file location
    #[serde(default)]
    pub log: LogConfig,
    /// Persisted eraser state location
    #[serde(default)]
    pub state: StateConfig,
    /// Data eraser settings
    #[serde(default)]
    pub eraser: EraserConfig,
}

impl Configuration {
    fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Path::new(DEFAULT_CONFIG_FILE))
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let config: Configuration = Self::figment(path).extract().map_err(Box::new)?;
        config.eraser.validate()?;
        Ok(config)
    }
}
