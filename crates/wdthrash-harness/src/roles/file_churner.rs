use std::sync::Arc;
use std::time::Duration;

use crate::churn::FileChurnSet;
use crate::worker::{Role, RoleWorker, WorkerContext, WorkerStats};
use wdthrash_config::log_churn_debug;

/// Deletes and recreates every backing file on a fixed cadence, so adders
/// keep registering against fresh inodes.
pub struct FileChurner {
    files: Arc<FileChurnSet>,
    interval: Duration,
}

impl FileChurner {
    pub fn new(files: Arc<FileChurnSet>, interval: Duration) -> Self {
        Self { files, interval }
    }
}

impl RoleWorker for FileChurner {
    fn role(&self) -> Role {
        Role::FileChurner
    }

    fn run(&mut self, ctx: &mut WorkerContext) -> WorkerStats {
        let mut stats = WorkerStats::default();
        while ctx.should_run() {
            stats.iterations += 1;
            let outcome = self.files.churn();
            stats.successes += outcome.succeeded as u64;
            stats.unexpected_errors += outcome.failed as u64;
            ctx.sleep(self.interval);
        }

        let cleanup = self.files.remove_all();
        log_churn_debug!("Backing files removed",
            worker = %ctx.id(),
            removed = cleanup.succeeded,
            failed = cleanup.failed);
        stats.unexpected_errors += cleanup.failed as u64;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_worker;
    use crate::worker::WorkerId;

    #[test]
    fn test_churns_then_cleans_up_on_stop() {
        let temp = tempfile::tempdir().unwrap();
        let files = Arc::new(FileChurnSet::new(temp.path(), 3));
        let churner = FileChurner::new(files.clone(), Duration::from_millis(10));

        let (stop, handle) = spawn_worker(churner, WorkerId::process_wide(Role::FileChurner, 0));
        std::thread::sleep(Duration::from_millis(50));
        stop.trigger();
        let stats = handle.join().unwrap();

        assert!(stats.successes >= 3);
        assert_eq!(stats.unexpected_errors, 0);
        assert!(files.paths().iter().all(|p| !p.exists()));
    }
}
