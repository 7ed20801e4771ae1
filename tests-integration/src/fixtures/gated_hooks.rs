//! Lifecycle hooks that can hold the eraser at a chosen file.

use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

use anyhow::{Result, bail};
use eraser::testing::RecordingHooks;
use eraser::{EraserError, EraserHooks, EraserResult};

use crate::SCENARIO_DEADLINE;

#[derive(Debug, Default)]
struct Gate {
    /// File whose `before_file` blocks until the gate opens.
    held: Option<u32>,
    reached: bool,
    open: bool,
    /// File whose `before_file` fails, simulating a crash.
    fail_at: Option<u32>,
}

/// [`RecordingHooks`] plus a gate in front of one file and an injectable
/// crash before another.
#[derive(Debug, Default)]
pub struct GatedHooks {
    recorder: RecordingHooks,
    gate: Mutex<Gate>,
    cond: Condvar,
}

impl GatedHooks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Gate> {
        match self.gate.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Holds the eraser in front of `file` until [`GatedHooks::open`].
    pub fn hold(&self, file: u32) {
        let mut gate = self.lock();
        gate.held = Some(file);
        gate.reached = false;
        gate.open = false;
    }

    /// Blocks until the eraser is waiting at the gate.
    pub fn wait_reached(&self) -> Result<()> {
        let deadline = Instant::now() + SCENARIO_DEADLINE;
        let mut gate = self.lock();
        while !gate.reached {
            let now = Instant::now();
            if now >= deadline {
                bail!("Eraser never reached the gate at {:?}", gate.held);
            }
            gate = match self.cond.wait_timeout(gate, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        Ok(())
    }

    pub fn open(&self) {
        let mut gate = self.lock();
        gate.open = true;
        self.cond.notify_all();
    }

    /// Makes `before_file(file)` fail, killing the eraser thread.
    pub fn fail_at(&self, file: u32) {
        self.lock().fail_at = Some(file);
    }

    pub fn crash_after_flip(&self, enabled: bool) {
        self.recorder.crash_after_flip(enabled);
    }

    pub fn events(&self) -> Vec<String> {
        self.recorder.events()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.recorder.count(prefix)
    }

    pub fn finished(&self, file: u32) -> bool {
        self.count(&format!("file_finished {file}")) > 0
    }

    pub fn cycles_ended(&self) -> usize {
        self.count("cycle_ended")
    }
}

impl EraserHooks for GatedHooks {
    fn cycle_started(&self, remaining: &BTreeSet<u32>) {
        self.recorder.cycle_started(remaining);
    }

    fn before_file(&self, file: u32) -> EraserResult<()> {
        self.recorder.before_file(file)?;
        let mut gate = self.lock();
        if gate.fail_at == Some(file) {
            return Err(EraserError::Hook {
                point: "before_file",
                message: format!("injected crash before file {file}"),
            });
        }
        if gate.held == Some(file) {
            gate.reached = true;
            self.cond.notify_all();
            while !gate.open {
                gate = match self.cond.wait(gate) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        }
        Ok(())
    }

    fn after_types_flipped(&self, file: u32) -> EraserResult<()> {
        self.recorder.after_types_flipped(file)
    }

    fn file_finished(&self, file: u32) {
        self.recorder.file_finished(file);
    }

    fn cycle_ended(&self, completed: bool) {
        self.recorder.cycle_ended(completed);
    }
}
