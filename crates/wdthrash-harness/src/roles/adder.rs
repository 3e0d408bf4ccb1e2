use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use super::{note_failure, InstanceBinding};
use crate::bounds::BoundsTracker;
use crate::subsystem::{Op, ALL_EVENTS};
use crate::worker::{ErrorThrottle, Role, RoleWorker, WorkerContext, WorkerStats};

/// Registers a watch on one backing file over and over, widening the shared
/// bounds with every descriptor it gets back.
pub struct Adder {
    binding: InstanceBinding,
    bounds: Arc<BoundsTracker>,
    path: PathBuf,
}

impl Adder {
    pub fn new(binding: InstanceBinding, bounds: Arc<BoundsTracker>, path: PathBuf) -> Self {
        Self {
            binding,
            bounds,
            path,
        }
    }
}

impl RoleWorker for Adder {
    fn role(&self) -> Role {
        Role::Adder
    }

    fn run(&mut self, ctx: &mut WorkerContext) -> WorkerStats {
        let mut stats = WorkerStats::default();
        let mut throttle = ErrorThrottle::default();
        let handle = self.binding.handle();

        while ctx.should_run() {
            stats.iterations += 1;
            match self
                .binding
                .subsystem
                .register(handle, &self.path, ALL_EVENTS)
            {
                Ok(wd) => {
                    stats.successes += 1;
                    self.bounds.observe(wd);
                }
                // Missing backing file is the churners' doing; retry at once
                Err(err) => note_failure(ctx, &mut stats, &mut throttle, Op::Register, err),
            }
            thread::yield_now();
        }
        stats
    }
}
