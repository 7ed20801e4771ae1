//! The eraser's cycle state machine.
//!
//! ```text
//! start ─► resume? ─┬─► running ─► cycle end ─► fresh cycle ─► running ...
//!                   └─► fresh cycle ──┘
//! ```
//!
//! A cycle covers every sealed file at least one period old at cycle start.
//! Files are erased one at a time, with the cycle record persisted after
//! each. Disable and period changes abandon the running cycle; shutdown
//! unwinds from any state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat};
use common::config::EraserConfig;
use tracing::{debug, error, info, warn};

use crate::collaborators::EngineContext;
use crate::config::ConfigHandle;
use crate::coordination::Coordinator;
use crate::error::{ControlSignal, EraserResult, Interrupt, Severity, StepResult};
use crate::file_eraser::{FileOutcome, erase_file};
use crate::lsn::Lsn;
use crate::metrics::EraserMetrics;
use crate::selector::{FileInfoCache, FileSelector};
use crate::state::{CYCLE_STATE_KEY, CycleFiles, FileSet, PersistentCycleState};
use crate::throttle::{Pacer, WorkThrottle, check_config};

/// Longest single idle wait; configuration changes and shutdown cut it short.
pub const IDLE_POLL: Duration = Duration::from_secs(60);

/// Upper bound on the pause per file while re-reading file facts on resume.
pub const RESUME_PAUSE_CAP: Duration = Duration::from_secs(1);

/// Work units per byte of eligible files: read, classify and rewrite.
pub const WORK_PER_BYTE: u64 = 3;

/// A running cycle.
#[derive(Debug)]
pub struct Cycle {
    pub start_ms: u64,
    pub end_ms: u64,
    pub period: Duration,
    pub files: CycleFiles,
    pub throttle: WorkThrottle,
    /// Recovery boundary when the cycle started; the aging boundary of the next cycle.
    pub start_lsn: Lsn,
    /// Files whose classification could not finish this cycle.
    pub deferred: FileSet,
    /// Why the last selection attempt found nothing.
    pub last_failure: Option<String>,
}

impl Cycle {
    fn candidates(&self) -> FileSet {
        self.files
            .remaining
            .difference(&self.deferred)
            .copied()
            .collect()
    }
}

pub struct Scheduler {
    ctx: EngineContext,
    config: Arc<ConfigHandle>,
    coordinator: Arc<Coordinator>,
    metrics: EraserMetrics,
    infos: FileInfoCache,
    oldest_allowed_obsolete_lsn: Lsn,
}

impl Scheduler {
    pub fn new(
        ctx: EngineContext,
        config: Arc<ConfigHandle>,
        coordinator: Arc<Coordinator>,
        metrics: EraserMetrics,
    ) -> Self {
        Self {
            ctx,
            config,
            coordinator,
            metrics,
            infos: FileInfoCache::new(),
            oldest_allowed_obsolete_lsn: Lsn::NULL,
        }
    }

    pub fn oldest_allowed_obsolete_lsn(&self) -> Lsn {
        self.oldest_allowed_obsolete_lsn
    }

    /// Runs until shutdown. A fatal error invalidates the environment and is returned.
    pub fn run(mut self) -> EraserResult<()> {
        info!("Data eraser started");
        let result = self.run_loop();
        match &result {
            Ok(()) => info!("Data eraser stopped"),
            Err(e) => {
                error!(error = %e, "Data eraser failed, invalidating environment");
                self.ctx.environment.invalidate(e);
            }
        }
        self.metrics.summary().log();
        result
    }

    fn run_loop(&mut self) -> EraserResult<()> {
        let mut try_resume = true;
        loop {
            let period = match self.wait_until_enabled() {
                Ok(period) => period,
                Err(ControlSignal::Shutdown) => return Ok(()),
                Err(_) => continue,
            };

            match self.run_cycle(period, std::mem::take(&mut try_resume)) {
                Ok(()) => {}
                Err(Interrupt::Fatal(e)) => return Err(e),
                Err(Interrupt::Signal(ControlSignal::Shutdown)) => return Ok(()),
                Err(Interrupt::Signal(signal)) => {
                    info!(reason = %signal, "Erasure cycle abandoned");
                    self.metrics.record_cycle_aborted();
                    self.ctx.hooks.cycle_ended(false);
                }
            }
        }
    }

    /// Blocks while erasure is disabled and returns the configured period.
    fn wait_until_enabled(&self) -> Result<Duration, ControlSignal> {
        let mut logged = false;
        loop {
            self.coordinator.check()?;
            if let Some(period) = self.config.current().effective_period() {
                return Ok(period);
            }
            if !logged {
                info!("Erasure disabled, waiting");
                logged = true;
            }
            self.coordinator.wait(self.ctx.clock.as_ref(), IDLE_POLL)?;
        }
    }

    fn run_cycle(&mut self, period: Duration, try_resume: bool) -> StepResult<()> {
        let resumed = if try_resume {
            self.resume_cycle(period)?
        } else {
            None
        };
        let mut cycle = match resumed {
            Some(cycle) => cycle,
            None => self.start_cycle(period)?,
        };

        let result = self.process_cycle(&mut cycle);
        if matches!(result, Err(Interrupt::Signal(ControlSignal::Shutdown)))
            && !cycle.files.remaining.is_empty()
        {
            info!(
                remaining = cycle.files.remaining.len(),
                completed = cycle.files.completed.len(),
                end = %format_time(cycle.end_ms),
                "Erasure cycle suspended"
            );
        }
        result
    }

    /// Picks up a persisted cycle whose end time is still ahead.
    pub fn resume_cycle(&mut self, period: Duration) -> StepResult<Option<Cycle>> {
        let Some(bytes) = self.ctx.store.get(CYCLE_STATE_KEY)? else {
            return Ok(None);
        };
        let state = match PersistentCycleState::decode(&bytes) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable erasure cycle state");
                return Ok(None);
            }
        };
        self.oldest_allowed_obsolete_lsn = state.oldest_allowed_obsolete_lsn;

        let now = self.ctx.clock.now_ms();
        if now >= state.end_time_ms {
            info!(end = %format_time(state.end_time_ms), "Cannot resume erasure cycle, its end time has passed");
            return Ok(None);
        }
        if state.end_time_ms.saturating_sub(state.start_time_ms) != period.as_millis() as u64 {
            info!("Cannot resume erasure cycle, the period has changed");
            return Ok(None);
        }

        // Re-read file facts at a small fraction of the original budget.
        let count = state.remaining.len().max(1) as u32;
        let pause = (period / 100 / count).min(RESUME_PAUSE_CAP);
        for &file in &state.remaining {
            self.coordinator.wait(self.ctx.clock.as_ref(), pause)?;
            check_config(&self.config, period)?;
            if !self.infos.contains(file) {
                self.infos.get(&self.ctx, file)?;
            }
        }

        let cycle = Cycle {
            start_ms: state.start_time_ms,
            end_ms: state.end_time_ms,
            period,
            files: CycleFiles {
                remaining: state.remaining,
                completed: state.completed,
                hard_linked: FileSet::new(),
            },
            throttle: WorkThrottle::new(state.total_work, period, self.ctx.clock.now_ms()),
            start_lsn: self.ctx.checkpoint.first_active_lsn(),
            deferred: FileSet::new(),
            last_failure: None,
        };
        info!(
            start = %format_time(cycle.start_ms),
            end = %format_time(cycle.end_ms),
            remaining = cycle.files.remaining.len(),
            completed = cycle.files.completed.len(),
            "Resumed erasure cycle"
        );
        self.publish_cycle(&cycle);
        Ok(Some(cycle))
    }

    /// Starts a cycle over every sealed file at least one period old.
    pub fn start_cycle(&mut self, period: Duration) -> StepResult<Cycle> {
        let now = self.ctx.clock.now_ms();
        let period_ms = period.as_millis() as u64;
        let cutoff = now.checked_sub(period_ms);

        let mut remaining = FileSet::new();
        let mut total_bytes = 0u64;
        if let Some(cutoff) = cutoff {
            for file in self.ctx.log.sealed_file_numbers()? {
                self.coordinator.check()?;
                let Some(info) = self.infos.get(&self.ctx, file)? else {
                    continue;
                };
                if info.creation_time_ms <= cutoff {
                    remaining.insert(file);
                    total_bytes += info.length;
                } else {
                    // Newer files only grow older; keep their facts for the next cycle.
                    debug!(file, "File too young for this erasure cycle");
                }
            }
        }

        let cycle = Cycle {
            start_ms: now,
            end_ms: now + period_ms,
            period,
            files: CycleFiles::new(remaining),
            throttle: WorkThrottle::new(WORK_PER_BYTE * total_bytes, period, now),
            start_lsn: self.ctx.checkpoint.first_active_lsn(),
            deferred: FileSet::new(),
            last_failure: None,
        };
        info!(
            start = %format_time(cycle.start_ms),
            end = %format_time(cycle.end_ms),
            files = cycle.files.remaining.len(),
            total_work = cycle.throttle.total_work(),
            "Started erasure cycle"
        );
        self.publish_cycle(&cycle);
        self.persist(&cycle)?;
        Ok(cycle)
    }

    fn publish_cycle(&self, cycle: &Cycle) {
        self.metrics.set_cycle(cycle.start_ms, cycle.end_ms);
        self.metrics
            .set_files_remaining(cycle.files.remaining.len() as u64);
        self.ctx.hooks.cycle_started(&cycle.files.remaining);
    }

    /// Erases files until the cycle's end time has passed.
    pub fn process_cycle(&mut self, cycle: &mut Cycle) -> StepResult<()> {
        loop {
            if self.ctx.clock.now_ms() >= cycle.end_ms {
                return self.end_cycle(cycle);
            }
            let snapshot = self.config.current();
            check_config(&self.config, cycle.period)?;

            let candidates = cycle.candidates();
            if candidates.is_empty() {
                self.idle(cycle)?;
                continue;
            }

            let selection = FileSelector::new(&self.ctx, &self.coordinator)
                .next_file(&candidates, &mut self.infos);
            let file = match selection {
                Ok(file) => file,
                Err(Interrupt::Signal(ControlSignal::NoUnprotectedFiles { severity, reason })) => {
                    if cycle.last_failure.as_deref() != Some(reason.as_str()) {
                        match severity {
                            Severity::Info => info!(%reason, "No unprotected files to erase"),
                            Severity::Warning => warn!(%reason, "No unprotected files to erase"),
                        }
                    }
                    cycle.last_failure = Some(reason);
                    self.idle(cycle)?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let result = self.process_file(cycle, file, &snapshot.config);
            self.coordinator.clear_current_file();
            match result {
                Ok(()) => {}
                Err(Interrupt::Signal(ControlSignal::AbortCurrentFile)) => {
                    info!(file, "Erasure of file aborted for protection");
                }
                Err(Interrupt::Signal(ControlSignal::DeferFile { reason })) => {
                    info!(file, %reason, "Deferring file to a later cycle");
                    cycle.deferred.insert(file);
                    cycle.last_failure = Some(reason);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Handles one selected file and records it as done.
    fn process_file(&mut self, cycle: &mut Cycle, file: u32, config: &EraserConfig) -> StepResult<()> {
        self.ctx.hooks.before_file(file)?;

        if self.ctx.log.has_external_hard_link(file)? {
            info!(file, "Skipping hard-linked file until the next cycle");
            cycle.files.skip_hard_linked(file);
            return self.file_done(cycle, file);
        }

        if self.ctx.tracker.is_reserved(file) && self.ctx.protector.delete_reserved_file(file)? {
            debug!(file, "Deleted reserved file instead of erasing it");
            self.metrics.record_reserved_file_deleted();
            cycle.files.complete(file);
            return self.file_done(cycle, file);
        }

        let outcome = {
            let mut pacer = Pacer::new(
                &self.coordinator,
                &self.config,
                self.ctx.clock.as_ref(),
                cycle.period,
                &mut cycle.throttle,
            );
            erase_file(
                &self.ctx,
                &mut pacer,
                &self.metrics,
                config,
                file,
                self.oldest_allowed_obsolete_lsn,
            )?
        };
        match outcome {
            FileOutcome::Erased { erased, rezeroed } => {
                debug!(file, erased, rezeroed, "Erased file");
                self.metrics.record_file_erased();
            }
            FileOutcome::Vanished => {
                debug!(file, "File already deleted");
                self.metrics.record_file_already_deleted();
            }
        }
        cycle.files.complete(file);
        self.file_done(cycle, file)
    }

    fn file_done(&mut self, cycle: &Cycle, file: u32) -> StepResult<()> {
        self.infos.forget(file);
        self.metrics
            .set_files_remaining(cycle.files.remaining.len() as u64);
        self.ctx.hooks.file_finished(file);
        self.persist(cycle)?;
        Ok(())
    }

    /// Waits a slice of the time left in the cycle.
    fn idle(&self, cycle: &Cycle) -> StepResult<()> {
        let left = cycle.end_ms.saturating_sub(self.ctx.clock.now_ms());
        if left > 0 {
            self.coordinator
                .wait(self.ctx.clock.as_ref(), Duration::from_millis(left).min(IDLE_POLL))?;
        }
        check_config(&self.config, cycle.period)?;
        Ok(())
    }

    fn end_cycle(&mut self, cycle: &Cycle) -> StepResult<()> {
        let completed = cycle.files.remaining.is_empty();
        if completed {
            info!(
                files = cycle.files.completed.len(),
                hard_linked = cycle.files.hard_linked.len(),
                "Erasure cycle completed"
            );
            self.metrics.record_cycle_completed();
        } else {
            warn!(
                remaining = cycle.files.remaining.len(),
                reason = cycle.last_failure.as_deref().unwrap_or("ran out of time"),
                "Erasure cycle ended incomplete"
            );
            self.metrics.record_cycle_aborted();
        }
        self.oldest_allowed_obsolete_lsn = cycle.start_lsn;
        self.persist(cycle)?;
        self.ctx.hooks.cycle_ended(completed);
        Ok(())
    }

    fn persist(&self, cycle: &Cycle) -> EraserResult<()> {
        let state = PersistentCycleState {
            start_time_ms: cycle.start_ms,
            end_time_ms: cycle.end_ms,
            total_work: cycle.throttle.total_work(),
            completed: cycle.files.completed.clone(),
            remaining: cycle.files.unfinished(),
            oldest_allowed_obsolete_lsn: self.oldest_allowed_obsolete_lsn,
        };
        self.ctx.store.put(CYCLE_STATE_KEY, &state.encode())
    }
}

/// Renders epoch milliseconds as an RFC 3339 timestamp.
pub fn format_time(ms: u64) -> String {
    DateTime::from_timestamp_millis(ms as i64)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}
