use std::sync::Arc;
use std::time::Duration;

use crate::bounds::BoundsTracker;
use crate::worker::{Role, RoleWorker, WorkerContext, WorkerStats};

/// Periodically forgets `low` so a long-closed descriptor cannot pin it.
pub struct BoundsResetter {
    bounds: Arc<BoundsTracker>,
    interval: Duration,
}

impl BoundsResetter {
    pub fn new(bounds: Arc<BoundsTracker>, interval: Duration) -> Self {
        Self { bounds, interval }
    }
}

impl RoleWorker for BoundsResetter {
    fn role(&self) -> Role {
        Role::BoundsResetter
    }

    fn run(&mut self, ctx: &mut WorkerContext) -> WorkerStats {
        let mut stats = WorkerStats::default();
        while ctx.should_run() {
            stats.iterations += 1;
            self.bounds.reset_low();
            stats.successes += 1;
            ctx.sleep(self.interval);
        }
        stats
    }
}
