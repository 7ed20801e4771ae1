use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::collaborators::EraserHooks;
use crate::error::{EraserError, EraserResult};

/// Records lifecycle events and can inject a crash between the type-flip
/// and zero-fill phases.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<String>>,
    crash_after_flip: AtomicBool,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next flushed batch fail once its type flips are durable.
    pub fn crash_after_flip(&self, enabled: bool) {
        self.crash_after_flip.store(enabled, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<String> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .count()
    }

    fn push(&self, event: String) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

impl EraserHooks for RecordingHooks {
    fn cycle_started(&self, remaining: &BTreeSet<u32>) {
        self.push(format!("cycle_started {remaining:?}"));
    }

    fn before_file(&self, file: u32) -> EraserResult<()> {
        self.push(format!("before_file {file}"));
        Ok(())
    }

    fn after_types_flipped(&self, file: u32) -> EraserResult<()> {
        self.push(format!("after_types_flipped {file}"));
        if self.crash_after_flip.load(Ordering::SeqCst) {
            return Err(EraserError::Hook {
                point: "after_types_flipped",
                message: format!("injected crash in file {file}"),
            });
        }
        Ok(())
    }

    fn file_finished(&self, file: u32) {
        self.push(format!("file_finished {file}"));
    }

    fn cycle_ended(&self, completed: bool) {
        self.push(format!("cycle_ended completed={completed}"));
    }
}
