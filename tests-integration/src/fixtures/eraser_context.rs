//! Eraser test context: a log directory, an in-memory engine, a simulated
//! clock and a durable cycle record that outlives eraser restarts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use common::config::EraserConfig;
use eraser::collaborators::MetadataStore;
use eraser::log::{FileSummary, LogFileManager, is_erased_at};
use eraser::state::CYCLE_STATE_KEY;
use eraser::testing::{MemoryEngine, SimulatedClock};
use eraser::{Clock, DataEraser, FileMetadataStore, Lsn, PersistentCycleState};
use tempfile::TempDir;

use super::GatedHooks;
use crate::generators::{GeneratedFile, HOUR_MS};

/// Simulated wall clock at the start of every scenario.
pub const START_MS: u64 = 100 * HOUR_MS;

/// An eraser thread together with the hooks observing it.
pub struct RunningEraser {
    pub eraser: DataEraser,
    pub hooks: Arc<GatedHooks>,
}

impl RunningEraser {
    /// Stops the thread and returns its terminal status.
    pub fn stop(self) -> Result<()> {
        self.eraser.shutdown()?;
        Ok(())
    }
}

pub struct EraserTestContext {
    temp_dir: TempDir,
    pub engine: Arc<MemoryEngine>,
    pub clock: Arc<SimulatedClock>,
    pub store: Arc<FileMetadataStore>,
}

impl EraserTestContext {
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new().context("Failed to create temp dir")?;
        let log_dir = temp_dir.path().join("log");
        std::fs::create_dir_all(&log_dir)?;
        let store = Arc::new(FileMetadataStore::new(temp_dir.path().join("meta"))?);
        Ok(Self {
            engine: Arc::new(MemoryEngine::new(&log_dir)),
            clock: Arc::new(SimulatedClock::new(START_MS)),
            store,
            temp_dir,
        })
    }

    pub fn log_dir(&self) -> PathBuf {
        self.temp_dir.path().join("log")
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Starts an eraser thread with fresh hooks, sharing the engine, clock
    /// and cycle record of every earlier run.
    pub fn start(&self, config: EraserConfig) -> Result<RunningEraser> {
        let hooks = Arc::new(GatedHooks::new());
        self.start_with(config, hooks)
    }

    /// Like [`EraserTestContext::start`] with hooks prepared by the caller.
    pub fn start_with(&self, config: EraserConfig, hooks: Arc<GatedHooks>) -> Result<RunningEraser> {
        let store: Arc<dyn MetadataStore> = self.store.clone();
        let mut ctx = self.engine.context_with_store(self.clock.clone(), store);
        ctx.hooks = hooks.clone();
        let eraser = DataEraser::new(ctx, config);
        eraser.start()?;
        Ok(RunningEraser { eraser, hooks })
    }

    /// The persisted cycle record, if one was written.
    pub fn persisted_state(&self) -> Result<Option<PersistentCycleState>> {
        let Some(bytes) = self.store.get(CYCLE_STATE_KEY)? else {
            return Ok(None);
        };
        Ok(Some(PersistentCycleState::decode(&bytes)?))
    }

    pub fn is_erased(&self, lsn: Lsn) -> Result<bool> {
        let path = self.log_dir().join(LogFileManager::file_name(lsn.file_number()));
        Ok(is_erased_at(&path, lsn)?)
    }

    pub fn summary(&self, file: &GeneratedFile) -> Result<FileSummary> {
        Ok(FileSummary::scan(&file.path, file.file_number)?)
    }

    /// Asserts that every doomed entry of `file` is erased and every kept one is not.
    pub fn assert_erased(&self, file: &GeneratedFile) -> Result<()> {
        for &lsn in &file.doomed {
            anyhow::ensure!(self.is_erased(lsn)?, "{lsn} should be erased");
        }
        self.assert_kept(file)
    }

    /// Asserts that `file` still holds all of its entries.
    pub fn assert_untouched(&self, file: &GeneratedFile) -> Result<()> {
        for &lsn in &file.doomed {
            anyhow::ensure!(!self.is_erased(lsn)?, "{lsn} should not be erased yet");
        }
        self.assert_kept(file)
    }

    fn assert_kept(&self, file: &GeneratedFile) -> Result<()> {
        for &lsn in &file.kept {
            anyhow::ensure!(!self.is_erased(lsn)?, "{lsn} should have survived");
        }
        Ok(())
    }
}
