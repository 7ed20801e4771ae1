//! State shared between the eraser thread and outside callers.
//!
//! Selection publishes the current file under the same lock the abort path
//! reads, and the abort path waits on the condition variable until the
//! eraser has let go of that file.

use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::collaborators::Clock;
use crate::error::{ControlSignal, EraserError, EraserResult};

#[derive(Debug, Default)]
struct Shared {
    current_file: Option<u32>,
    abort_requested: bool,
    shutdown: bool,
    /// Set by [`Coordinator::notify`] so a wake-up that arrives before the
    /// eraser starts waiting is not lost.
    wake_pending: bool,
}

#[derive(Debug, Default)]
pub struct Coordinator {
    state: Mutex<Shared>,
    cond: Condvar,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Runs `pick` under the selection lock and publishes its result as the
    /// current file.
    pub fn publish_selection<F>(&self, pick: F) -> Option<u32>
    where
        F: FnOnce() -> Option<u32>,
    {
        let mut state = self.lock();
        let file = pick();
        if file.is_some() {
            state.current_file = file;
            state.abort_requested = false;
        }
        file
    }

    pub fn current_file(&self) -> Option<u32> {
        self.lock().current_file
    }

    /// Clears the current file marker and releases any waiting aborter.
    pub fn clear_current_file(&self) {
        let mut state = self.lock();
        state.current_file = None;
        state.abort_requested = false;
        self.cond.notify_all();
    }

    /// Stops erasure of the current file if it is in `protected`.
    ///
    /// Blocks until the eraser has cleared its current-file marker, or fails
    /// with [`EraserError::AbortTimeout`] after `timeout`.
    pub fn abort_erasure(&self, protected: &BTreeSet<u32>, timeout: Duration) -> EraserResult<()> {
        let mut state = self.lock();
        let Some(file) = state.current_file else {
            return Ok(());
        };
        if !protected.contains(&file) {
            return Ok(());
        }

        debug!(file, "Aborting erasure of protected file");
        state.abort_requested = true;
        self.cond.notify_all();

        let deadline = Instant::now() + timeout;
        while state.current_file == Some(file) {
            let now = Instant::now();
            if now >= deadline {
                return Err(EraserError::AbortTimeout { file, timeout });
            }
            state = match self.cond.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        Ok(())
    }

    pub fn request_shutdown(&self) {
        let mut state = self.lock();
        state.shutdown = true;
        self.cond.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    /// Wakes the eraser thread, e.g. after a configuration change.
    pub fn notify(&self) {
        let mut state = self.lock();
        state.wake_pending = true;
        self.cond.notify_all();
    }

    /// Cancellation checkpoint.
    ///
    /// An abort request is consumed here: the current-file marker is cleared
    /// before [`ControlSignal::AbortCurrentFile`] is returned.
    pub fn check(&self) -> Result<(), ControlSignal> {
        let mut state = self.lock();
        Self::check_locked(&mut state, &self.cond)
    }

    fn check_locked(state: &mut Shared, cond: &Condvar) -> Result<(), ControlSignal> {
        if state.shutdown {
            return Err(ControlSignal::Shutdown);
        }
        if state.abort_requested {
            state.abort_requested = false;
            state.current_file = None;
            cond.notify_all();
            return Err(ControlSignal::AbortCurrentFile);
        }
        Ok(())
    }

    /// Sleeps for up to `requested` (as mapped by `clock`), returning early on
    /// any notification. Checks for cancellation before and after.
    pub fn wait(&self, clock: &dyn Clock, requested: Duration) -> Result<(), ControlSignal> {
        let mut state = self.lock();
        Self::check_locked(&mut state, &self.cond)?;
        if state.wake_pending {
            state.wake_pending = false;
            return Ok(());
        }

        let real = clock.pause(requested);
        if !real.is_zero() {
            state = match self.cond.wait_timeout(state, real) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        state.wake_pending = false;
        Self::check_locked(&mut state, &self.cond)
    }
}
