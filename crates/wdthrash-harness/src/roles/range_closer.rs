use std::sync::Arc;

use super::{note_failure, InstanceBinding};
use crate::backoff::Backoff;
use crate::bounds::BoundsTracker;
use crate::subsystem::Op;
use crate::worker::{ErrorThrottle, Role, RoleWorker, WorkerContext, WorkerStats};

/// Descriptors swept between stop checks.
pub const STOP_CHECK_STRIDE: i32 = 256;

/// Sweeps `[low, high)` removing every descriptor in it.
///
/// The pair is read once per sweep without synchronization. A sweep may cover
/// descriptors this instance never issued, or ones just reissued elsewhere.
pub struct RangeCloser {
    binding: InstanceBinding,
    bounds: Arc<BoundsTracker>,
}

impl RangeCloser {
    pub fn new(binding: InstanceBinding, bounds: Arc<BoundsTracker>) -> Self {
        Self { binding, bounds }
    }
}

impl RoleWorker for RangeCloser {
    fn role(&self) -> Role {
        Role::RangeCloser
    }

    fn run(&mut self, ctx: &mut WorkerContext) -> WorkerStats {
        let mut stats = WorkerStats::default();
        let mut throttle = ErrorThrottle::default();
        let mut backoff = Backoff::new();
        let handle = self.binding.handle();

        'sweep: while ctx.should_run() {
            stats.iterations += 1;
            let (low, high) = self.bounds.snapshot();
            if low >= high {
                backoff.snooze();
                continue;
            }
            backoff.reset();

            for wd in low..high {
                if wd.wrapping_sub(low) % STOP_CHECK_STRIDE == 0 && ctx.stop_requested() {
                    continue 'sweep;
                }
                match self.binding.subsystem.unregister(handle, wd) {
                    Ok(()) => stats.successes += 1,
                    Err(err) => note_failure(ctx, &mut stats, &mut throttle, Op::Unregister, err),
                }
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::SubsystemInstance;
    use crate::testing::{spawn_worker, MockSubsystem, UnregisterScript};
    use crate::worker::WorkerId;
    use std::time::Duration;

    #[test]
    fn test_sweeps_half_open_range() {
        let mock = Arc::new(MockSubsystem::new());
        let instance = Arc::new(SubsystemInstance::open(mock.as_ref(), 0).unwrap());
        let bounds = Arc::new(BoundsTracker::new());
        bounds.observe(10);
        bounds.observe(14);
        let closer = RangeCloser::new(InstanceBinding::new(mock.clone(), instance), bounds);

        let (stop, handle) = spawn_worker(closer, WorkerId::per_instance(Role::RangeCloser, 0, 0));
        std::thread::sleep(Duration::from_millis(20));
        stop.trigger();
        let stats = handle.join().unwrap();

        // 4 descriptors (10..14) per completed sweep
        assert!(stats.successes >= 4);
        assert!(mock.unregistered().iter().all(|wd| (10..14).contains(wd)));
    }

    #[test]
    fn test_not_found_never_ends_the_loop() {
        let mock = Arc::new(MockSubsystem::new().with_unregister(UnregisterScript::NotFound));
        let instance = Arc::new(SubsystemInstance::open(mock.as_ref(), 0).unwrap());
        let bounds = Arc::new(BoundsTracker::new());
        bounds.observe(1);
        bounds.observe(100);
        let closer = RangeCloser::new(InstanceBinding::new(mock.clone(), instance), bounds);

        let (stop, handle) = spawn_worker(closer, WorkerId::per_instance(Role::RangeCloser, 0, 0));
        std::thread::sleep(Duration::from_millis(100));
        assert!(!handle.is_finished());
        stop.trigger();
        let stats = handle.join().unwrap();

        assert!(stats.expected_races > 0);
        assert_eq!(stats.unexpected_errors, 0);
    }

    #[test]
    fn test_empty_or_inverted_range_is_idle() {
        let mock = Arc::new(MockSubsystem::new());
        let instance = Arc::new(SubsystemInstance::open(mock.as_ref(), 0).unwrap());
        // Fresh tracker: low is the sentinel, high is 0
        let bounds = Arc::new(BoundsTracker::new());
        let closer = RangeCloser::new(InstanceBinding::new(mock.clone(), instance), bounds);

        let (stop, handle) = spawn_worker(closer, WorkerId::per_instance(Role::RangeCloser, 0, 0));
        std::thread::sleep(Duration::from_millis(20));
        stop.trigger();
        let stats = handle.join().unwrap();

        assert!(stats.iterations > 0);
        assert_eq!(mock.unregister_calls(), 0);
    }
}
