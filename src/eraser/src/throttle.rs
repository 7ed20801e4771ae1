//! Uniform pacing of a cycle's work over its period.
//!
//! Total work is estimated up front. Each unit of work done moves the point
//! in time the cycle is "allowed" to have reached; when the caller is ahead
//! of that point it sleeps. Falling behind never speeds anything up.

use std::time::Duration;

use crate::collaborators::Clock;
use crate::config::ConfigHandle;
use crate::coordination::Coordinator;
use crate::error::ControlSignal;

/// Deficits below this are not worth a sleep.
pub const MIN_DELAY: Duration = Duration::from_millis(10);

/// Longest single sleep, so cancellation stays responsive.
pub const MAX_POLL_SLICE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WorkThrottle {
    total_work: u64,
    duration_ms: u64,
    start_ms: u64,
    work_done: u64,
}

impl WorkThrottle {
    pub fn new(total_work: u64, duration: Duration, start_ms: u64) -> Self {
        Self {
            total_work,
            duration_ms: duration.as_millis() as u64,
            start_ms,
            work_done: 0,
        }
    }

    pub fn total_work(&self) -> u64 {
        self.total_work
    }

    pub fn work_done(&self) -> u64 {
        self.work_done
    }

    pub fn add_work(&mut self, amount: u64) {
        self.work_done = self.work_done.saturating_add(amount);
    }

    /// How far ahead of uniform pacing the caller is at `now_ms`, if by more
    /// than [`MIN_DELAY`].
    pub fn deficit(&self, now_ms: u64) -> Option<Duration> {
        if self.total_work == 0 {
            return None;
        }
        let expected_ms = (self.work_done.min(self.total_work) as u128
            * self.duration_ms as u128
            / self.total_work as u128) as u64;
        let elapsed_ms = now_ms.saturating_sub(self.start_ms);
        let deficit = Duration::from_millis(expected_ms.saturating_sub(elapsed_ms));
        (deficit > MIN_DELAY).then_some(deficit)
    }
}

/// Fails when the configuration no longer allows the running cycle.
pub fn check_config(config: &ConfigHandle, cycle_period: Duration) -> Result<(), ControlSignal> {
    match config.current().effective_period() {
        None => Err(ControlSignal::Disabled),
        Some(period) if period != cycle_period => Err(ControlSignal::PeriodChanged),
        Some(_) => Ok(()),
    }
}

/// Cancellation checkpoints and throttling for one cycle.
pub struct Pacer<'a> {
    coordinator: &'a Coordinator,
    config: &'a ConfigHandle,
    clock: &'a dyn Clock,
    period: Duration,
    throttle: &'a mut WorkThrottle,
}

impl<'a> Pacer<'a> {
    pub fn new(
        coordinator: &'a Coordinator,
        config: &'a ConfigHandle,
        clock: &'a dyn Clock,
        period: Duration,
        throttle: &'a mut WorkThrottle,
    ) -> Self {
        Self {
            coordinator,
            config,
            clock,
            period,
            throttle,
        }
    }

    /// Observes shutdown, abort, disable and period changes.
    pub fn checkpoint(&self) -> Result<(), ControlSignal> {
        self.coordinator.check()?;
        check_config(self.config, self.period)
    }

    /// Accounts `amount` units of work and sleeps off any lead over the schedule.
    pub fn throttle(&mut self, amount: u64) -> Result<(), ControlSignal> {
        self.throttle.add_work(amount);
        self.checkpoint()?;
        while let Some(deficit) = self.throttle.deficit(self.clock.now_ms()) {
            self.coordinator
                .wait(self.clock, deficit.min(MAX_POLL_SLICE))?;
            self.checkpoint()?;
        }
        Ok(())
    }
}
