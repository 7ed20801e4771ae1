use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::collaborators::Clock;

/// Clock whose time only moves when advanced or when the eraser waits.
///
/// Every wait advances simulated time by the full requested amount and
/// blocks for at most `real_pause` of real time, so multi-day cycles run in
/// milliseconds.
#[derive(Debug)]
pub struct SimulatedClock {
    now_ms: AtomicU64,
    real_pause: Duration,
}

impl SimulatedClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
            real_pause: Duration::from_millis(1),
        }
    }

    pub fn with_real_pause(mut self, real_pause: Duration) -> Self {
        self.real_pause = real_pause;
        self
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_ms(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for SimulatedClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn pause(&self, requested: Duration) -> Duration {
        self.advance(requested);
        self.real_pause.min(requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_advances_simulated_time() {
        let clock = SimulatedClock::new(1_000);
        let real = clock.pause(Duration::from_secs(3600));
        assert_eq!(clock.now_ms(), 1_000 + 3_600_000);
        assert_eq!(real, Duration::from_millis(1));
    }
}
