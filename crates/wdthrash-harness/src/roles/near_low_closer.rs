use std::sync::Arc;

use super::{note_failure, InstanceBinding};
use crate::backoff::Backoff;
use crate::bounds::{BoundsTracker, LOW_SENTINEL};
use crate::subsystem::Op;
use crate::worker::{ErrorThrottle, Role, RoleWorker, WorkerContext, WorkerStats};

/// Descriptors past `low` hit on each pass: `[low, low + NEAR_LOW_SPAN]`.
pub const NEAR_LOW_SPAN: i32 = 3;

/// Hammers the smallest live descriptors, the ones the kernel reissues first.
pub struct NearLowCloser {
    binding: InstanceBinding,
    bounds: Arc<BoundsTracker>,
}

impl NearLowCloser {
    pub fn new(binding: InstanceBinding, bounds: Arc<BoundsTracker>) -> Self {
        Self { binding, bounds }
    }
}

impl RoleWorker for NearLowCloser {
    fn role(&self) -> Role {
        Role::NearLowCloser
    }

    fn run(&mut self, ctx: &mut WorkerContext) -> WorkerStats {
        let mut stats = WorkerStats::default();
        let mut throttle = ErrorThrottle::default();
        let mut backoff = Backoff::new();
        let handle = self.binding.handle();

        while ctx.should_run() {
            stats.iterations += 1;
            // One load: a reset between check and use would target the sentinel
            let low = self.bounds.low();
            if low == LOW_SENTINEL {
                backoff.snooze();
                continue;
            }
            backoff.reset();

            for wd in low..=low.saturating_add(NEAR_LOW_SPAN) {
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
    use crate::testing::{spawn_worker, MockSubsystem};
    use crate::worker::WorkerId;
    use std::time::Duration;

    #[test]
    fn test_targets_four_lowest() {
        let mock = Arc::new(MockSubsystem::new());
        let instance = Arc::new(SubsystemInstance::open(mock.as_ref(), 0).unwrap());
        let bounds = Arc::new(BoundsTracker::new());
        bounds.observe(7);
        bounds.observe(50);
        let closer = NearLowCloser::new(InstanceBinding::new(mock.clone(), instance), bounds);

        let (stop, handle) = spawn_worker(closer, WorkerId::per_instance(Role::NearLowCloser, 0, 0));
        std::thread::sleep(Duration::from_millis(20));
        stop.trigger();
        handle.join().unwrap();

        let targets = mock.unregistered();
        assert!(!targets.is_empty());
        assert!(targets.iter().all(|wd| (7..=10).contains(wd)));
    }

    #[test]
    fn test_idle_while_low_is_sentinel() {
        let mock = Arc::new(MockSubsystem::new());
        let instance = Arc::new(SubsystemInstance::open(mock.as_ref(), 0).unwrap());
        let bounds = Arc::new(BoundsTracker::new());
        bounds.observe(5);
        bounds.reset_low();
        let closer = NearLowCloser::new(InstanceBinding::new(mock.clone(), instance), bounds);

        let (stop, handle) = spawn_worker(closer, WorkerId::per_instance(Role::NearLowCloser, 0, 0));
        std::thread::sleep(Duration::from_millis(20));
        stop.trigger();
        handle.join().unwrap();

        assert_eq!(mock.unregister_calls(), 0);
    }

    #[test]
    fn test_concurrent_resets_never_target_sentinel() {
        let mock = Arc::new(MockSubsystem::new());
        let instance = Arc::new(SubsystemInstance::open(mock.as_ref(), 0).unwrap());
        let bounds = Arc::new(BoundsTracker::new());
        let closer =
            NearLowCloser::new(InstanceBinding::new(mock.clone(), instance), bounds.clone());

        let (stop, handle) = spawn_worker(closer, WorkerId::per_instance(Role::NearLowCloser, 0, 0));
        let deadline = std::time::Instant::now() + Duration::from_millis(100);
        while std::time::Instant::now() < deadline {
            bounds.observe(5);
            bounds.reset_low();
        }
        stop.trigger();
        handle.join().unwrap();

        let targets = mock.unregistered();
        assert!(targets.iter().all(|wd| (5..=8).contains(wd)), "{:?}", targets);
    }
}
