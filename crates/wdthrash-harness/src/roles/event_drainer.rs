use std::time::Duration;

use super::{note_failure, InstanceBinding};
use crate::backoff::Backoff;
use crate::subsystem::Op;
use crate::worker::{ErrorThrottle, Role, RoleWorker, WorkerContext, WorkerStats};

/// Read size per call. Room for a few hundred `inotify_event` records.
pub const DRAIN_BUFFER_SIZE: usize = 8192;

/// Empties the instance's event queue so producers never block on overflow.
/// Event contents are never parsed.
pub struct EventDrainer {
    binding: InstanceBinding,
    timeout: Duration,
    buf: Vec<u8>,
}

impl EventDrainer {
    pub fn new(binding: InstanceBinding, timeout: Duration) -> Self {
        Self {
            binding,
            timeout,
            buf: vec![0; DRAIN_BUFFER_SIZE],
        }
    }
}

impl RoleWorker for EventDrainer {
    fn role(&self) -> Role {
        Role::EventDrainer
    }

    fn run(&mut self, ctx: &mut WorkerContext) -> WorkerStats {
        let mut stats = WorkerStats::default();
        let mut throttle = ErrorThrottle::default();
        let mut backoff = Backoff::new();
        let handle = self.binding.handle();

        while ctx.should_run() {
            stats.iterations += 1;
            match self
                .binding
                .subsystem
                .read_events(handle, &mut self.buf, self.timeout)
            {
                Ok(0) => backoff.snooze(),
                Ok(n) => {
                    stats.successes += 1;
                    stats.bytes_drained += n as u64;
                    backoff.reset();
                }
                Err(err) => {
                    note_failure(ctx, &mut stats, &mut throttle, Op::Read, err);
                    backoff.snooze();
                }
            }
        }
        stats
    }
}
