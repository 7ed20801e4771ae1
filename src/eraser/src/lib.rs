//! Background erasure of obsolete data in log-structured storage.
//!
//! A dedicated thread periodically rewrites sealed log files in place so
//! that deleted, expired and extinct records are physically destroyed rather
//! than merely unreachable. Work is spread evenly over a configurable period
//! and cycle progress survives restarts.

pub mod aging;
pub mod classifier;
pub mod collaborators;
pub mod config;
pub mod coordination;
pub mod eraser;
pub mod error;
pub mod file_eraser;
pub mod log;
pub mod lookahead;
pub mod lsn;
pub mod metrics;
pub mod rewrite;
pub mod scheduler;
pub mod selector;
pub mod state;
pub mod store;
pub mod throttle;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use collaborators::{Clock, EngineContext, EraserHooks, NoopHooks, SystemClock};
pub use config::{ConfigHandle, ConfigSnapshot};
pub use eraser::DataEraser;
pub use error::{ControlSignal, EraserError, EraserResult, Interrupt, Severity};
pub use lsn::{Lsn, Vlsn};
pub use metrics::{EraserMetrics, MetricsSummary};
pub use state::PersistentCycleState;
pub use store::{FileMetadataStore, InMemoryMetadataStore};
