use std::sync::Arc;
use std::time::Duration;

use crate::mount::{MountSpec, Mounter};
use crate::worker::{ErrorThrottle, Role, RoleWorker, WorkerContext, WorkerStats};
use wdthrash_config::{log_churn_debug, log_churn_warn};

/// Mounts over the working directory, holds briefly, detaches. Watches under
/// the directory lose their backing filesystem on every cycle.
pub struct MountChurner {
    mounter: Arc<dyn Mounter>,
    spec: MountSpec,
    hold: Duration,
    settle: Duration,
}

impl MountChurner {
    pub fn new(mounter: Arc<dyn Mounter>, spec: MountSpec, hold: Duration, settle: Duration) -> Self {
        Self {
            mounter,
            spec,
            hold,
            settle,
        }
    }
}

impl RoleWorker for MountChurner {
    fn role(&self) -> Role {
        Role::MountChurner
    }

    fn run(&mut self, ctx: &mut WorkerContext) -> WorkerStats {
        let mut stats = WorkerStats::default();
        let mut mount_errors = ErrorThrottle::default();
        let mut unmount_errors = ErrorThrottle::default();

        while ctx.should_run() {
            stats.iterations += 1;
            match self.mounter.mount(&self.spec) {
                Ok(()) => {
                    stats.successes += 1;
                    // Never leave the mount behind, even when stopping
                    ctx.sleep(self.hold);
                    if let Err(errno) = self.mounter.unmount(&self.spec.target) {
                        stats.unexpected_errors += 1;
                        if unmount_errors.should_log() {
                            log_churn_warn!("Unmount failed",
                                target = %self.spec.target.display(),
                                error = %errno,
                                occurrences = unmount_errors.seen());
                        }
                    }
                }
                Err(errno) => {
                    stats.unexpected_errors += 1;
                    if mount_errors.should_log() {
                        log_churn_warn!("Mount failed",
                            source = %self.spec.source.display(),
                            target = %self.spec.target.display(),
                            fstype = %self.spec.fstype,
                            error = %errno,
                            occurrences = mount_errors.seen());
                    }
                }
            }
            ctx.sleep(self.settle);
        }

        log_churn_debug!("Mount churner stopped", worker = %ctx.id(), cycles = stats.successes);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{spawn_worker, RecordingMounter};
    use crate::worker::WorkerId;
    use std::path::PathBuf;

    fn spec() -> MountSpec {
        MountSpec {
            source: PathBuf::from("/tmp/src"),
            target: PathBuf::from("/tmp/target"),
            fstype: "tmpfs".to_string(),
            options: None,
        }
    }

    #[test]
    fn test_every_mount_is_unmounted() {
        let mounter = Arc::new(RecordingMounter::new());
        let churner = MountChurner::new(
            mounter.clone(),
            spec(),
            Duration::from_millis(5),
            Duration::from_millis(5),
        );

        let (stop, handle) = spawn_worker(churner, WorkerId::process_wide(Role::MountChurner, 0));
        std::thread::sleep(Duration::from_millis(60));
        stop.trigger();
        let stats = handle.join().unwrap();

        assert!(mounter.mounts() > 0);
        assert_eq!(mounter.mounts(), mounter.unmounts());
        assert_eq!(stats.successes, mounter.mounts());
    }

    #[test]
    fn test_mount_failure_keeps_looping() {
        let mounter = Arc::new(RecordingMounter::failing());
        let churner = MountChurner::new(
            mounter.clone(),
            spec(),
            Duration::from_millis(5),
            Duration::from_millis(5),
        );

        let (stop, handle) = spawn_worker(churner, WorkerId::process_wide(Role::MountChurner, 0));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!handle.is_finished());
        stop.trigger();
        let stats = handle.join().unwrap();

        assert!(stats.unexpected_errors > 1);
        assert_eq!(mounter.unmounts(), 0);
    }
}
