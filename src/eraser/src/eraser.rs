//! Runtime handle of the data eraser.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use common::config::EraserConfig;
use tracing::{debug, info, warn};

use crate::collaborators::EngineContext;
use crate::config::{ConfigHandle, ConfigSnapshot};
use crate::coordination::Coordinator;
use crate::error::{EraserError, EraserResult};
use crate::log::is_erased_at;
use crate::lsn::Lsn;
use crate::metrics::EraserMetrics;
use crate::scheduler::Scheduler;

pub const THREAD_NAME: &str = "data-eraser";

/// Owns the eraser thread and is the single entry point for other engine components.
pub struct DataEraser {
    ctx: EngineContext,
    config: Arc<ConfigHandle>,
    coordinator: Arc<Coordinator>,
    metrics: EraserMetrics,
    thread: Mutex<Option<JoinHandle<EraserResult<()>>>>,
}

impl DataEraser {
    pub fn new(ctx: EngineContext, config: EraserConfig) -> Self {
        Self {
            ctx,
            config: Arc::new(ConfigHandle::new(config)),
            coordinator: Arc::new(Coordinator::new()),
            metrics: EraserMetrics::new(),
            thread: Mutex::new(None),
        }
    }

    fn thread_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<EraserResult<()>>>> {
        match self.thread.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Spawns the eraser thread. Calling it again while running does nothing.
    pub fn start(&self) -> EraserResult<()> {
        let mut slot = self.thread_slot();
        if slot.is_some() {
            return Ok(());
        }
        let scheduler = Scheduler::new(
            self.ctx.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.coordinator),
            self.metrics.clone(),
        );
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || scheduler.run())
            .map_err(|e| EraserError::io("spawning the eraser thread", e))?;
        *slot = Some(handle);
        Ok(())
    }

    /// Installs a new configuration and wakes the eraser to look at it.
    pub fn update_config(&self, config: EraserConfig) -> u64 {
        let version = self.config.update(config);
        debug!(version, "Eraser configuration updated");
        self.coordinator.notify();
        version
    }

    pub fn config(&self) -> Arc<ConfigSnapshot> {
        self.config.current()
    }

    pub fn is_enabled(&self) -> bool {
        self.config.current().config.is_enabled()
    }

    /// Stops erasure of the current file if `protected` contains it, and waits
    /// until the eraser no longer touches it.
    pub fn abort_erasure(&self, protected: &BTreeSet<u32>) -> EraserResult<()> {
        let timeout = self.config.current().config.abort_timeout;
        self.coordinator.abort_erasure(protected, timeout)
    }

    /// File being processed right now, if any.
    pub fn current_file(&self) -> Option<u32> {
        self.coordinator.current_file()
    }

    /// Reads the entry's type tag directly from its file.
    pub fn is_lsn_erased(&self, lsn: Lsn) -> EraserResult<bool> {
        is_erased_at(&self.ctx.log.file_path(lsn.file_number()), lsn)
    }

    pub fn metrics(&self) -> &EraserMetrics {
        &self.metrics
    }

    /// Asks the thread to stop and returns its terminal status.
    pub fn shutdown(&self) -> EraserResult<()> {
        self.coordinator.request_shutdown();
        let Some(handle) = self.thread_slot().take() else {
            return Ok(());
        };
        info!("Waiting for the data eraser to stop");
        handle.join().map_err(|_| EraserError::ThreadPanicked)?
    }
}

impl Drop for DataEraser {
    fn drop(&mut self) {
        let running = self.thread_slot().is_some();
        if running {
            if let Err(error) = self.shutdown() {
                warn!(%error, "Data eraser shutdown failed");
            }
        }
    }
}
