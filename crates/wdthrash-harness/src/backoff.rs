//! Adaptive idle backoff for worker loops (spin → yield → sleep).

use std::thread;
use std::time::Duration;

const SPIN_LIMIT: u32 = 10;
const YIELD_LIMIT: u32 = 100;
const STEP_CAP: u32 = 1000;

/// Longest single idle pause.
pub const MAX_IDLE_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call after a productive iteration.
    #[inline]
    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// Call after an idle iteration.
    pub fn snooze(&mut self) {
        self.step = self.step.saturating_add(1).min(STEP_CAP);

        if self.step < SPIN_LIMIT {
            std::hint::spin_loop();
        } else if self.step < YIELD_LIMIT {
            thread::yield_now();
        } else {
            thread::sleep(MAX_IDLE_SLEEP);
        }
    }

    pub fn is_sleeping(&self) -> bool {
        self.step >= YIELD_LIMIT
    }
}
