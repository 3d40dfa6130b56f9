use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::agent_engine::state::LoopConfig;

/// Failure budget plus optional wall-clock limit for one run.
///
/// `count` never exceeds `max`: the engine checks [`exhausted`](Self::exhausted)
/// after every increment and stops.
pub struct LoopController {
    config: LoopConfig,
    start_time: std::time::Instant,
    failure_count: u32,
}

impl LoopController {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            start_time: std::time::Instant::now(),
            failure_count: 0,
        }
    }

    pub fn max_failures(&self) -> u32 {
        self.config.max_failures
    }

    pub fn failures(&self) -> u32 {
        self.failure_count
    }

    pub fn record_failure(&mut self) {
        self.failure_count = (self.failure_count + 1).min(self.config.max_failures);
    }

    pub fn record_success(&mut self) {
        self.failure_count = 0;
    }

    /// Start a fresh run: zero failures, restart the clock.
    pub fn reset(&mut self) {
        self.failure_count = 0;
        self.start_time = std::time::Instant::now();
    }

    pub fn exhausted(&self) -> bool {
        self.failure_count >= self.config.max_failures
    }

    pub fn timed_out(&self) -> bool {
        match self.config.max_duration_minutes {
            Some(max_min) => self.start_time.elapsed().as_secs() / 60 >= max_min as u64,
            None => false,
        }
    }

    pub fn should_stop(&self) -> bool {
        self.exhausted() || self.timed_out()
    }
}

/// Admits at most one task or calibration run at a time.
#[derive(Debug, Clone, Default)]
pub struct RunLock {
    busy: Arc<AtomicBool>,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_claim(&self) -> Option<RunClaim> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunClaim {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Held for the duration of a run; releases the lock on drop.
#[derive(Debug)]
pub struct RunClaim {
    busy: Arc<AtomicBool>,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
