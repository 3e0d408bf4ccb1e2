//! Process-wide cooperative stop flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep inside [`StopSignal::sleep`].
pub const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Level-triggered stop request shared by every worker of a run.
///
/// Set at most once and never cleared. A worker that checks late still sees
/// the request.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Returns `true` only for the call that set the flag.
    pub fn trigger(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleep for `total`, waking every [`SLEEP_SLICE`] to check the flag.
    ///
    /// Returns `false` if the sleep was cut short by a stop request.
    pub fn sleep(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.is_set() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_is_idempotent() {
        let stop = StopSignal::new();
        assert!(!stop.is_set());
        assert!(stop.trigger());
        assert!(!stop.trigger());
        assert!(stop.is_set());
    }

    #[test]
    fn test_clones_share_flag() {
        let stop = StopSignal::new();
        let other = stop.clone();
        other.trigger();
        assert!(stop.is_set());
    }

    #[test]
    fn test_sleep_runs_to_completion() {
        let stop = StopSignal::new();
        let start = Instant::now();
        assert!(stop.sleep(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_sleep_cut_short_by_stop() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.trigger();
        });

        let start = Instant::now();
        assert!(!stop.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(2));
        waker.join().unwrap();
    }
}
