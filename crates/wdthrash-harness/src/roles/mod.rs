//! The racing roles.
//!
//! Per-instance roles hold an [`InstanceBinding`]; process-wide roles hold
//! only what they touch. Everything is injected at construction, so each
//! worker can be driven on its own against a mock subsystem.

mod adder;
mod bounds_resetter;
mod event_drainer;
mod file_churner;
mod mount_churner;
mod near_low_closer;
mod range_closer;

use std::sync::Arc;

pub use adder::Adder;
pub use bounds_resetter::BoundsResetter;
pub use event_drainer::{EventDrainer, DRAIN_BUFFER_SIZE};
pub use file_churner::FileChurner;
pub use mount_churner::MountChurner;
pub use near_low_closer::{NearLowCloser, NEAR_LOW_SPAN};
pub use range_closer::{RangeCloser, STOP_CHECK_STRIDE};

use crate::instance::SubsystemInstance;
use crate::subsystem::{InstanceHandle, Op, SubsystemError, WatchSubsystem};
use crate::worker::{ErrorThrottle, WorkerContext, WorkerStats};
use wdthrash_config::{log_worker_debug, log_worker_warn};

/// A subsystem plus one of its open instances.
#[derive(Clone)]
pub struct InstanceBinding {
    pub subsystem: Arc<dyn WatchSubsystem>,
    pub instance: Arc<SubsystemInstance>,
}

impl InstanceBinding {
    pub fn new(subsystem: Arc<dyn WatchSubsystem>, instance: Arc<SubsystemInstance>) -> Self {
        Self {
            subsystem,
            instance,
        }
    }

    #[inline]
    pub fn handle(&self) -> InstanceHandle {
        self.instance.handle()
    }
}

/// Count a failed subsystem call and log it at the level its severity calls for.
pub(crate) fn note_failure(
    ctx: &WorkerContext,
    stats: &mut WorkerStats,
    throttle: &mut ErrorThrottle,
    op: Op,
    err: SubsystemError,
) {
    if stats.record_failure(err.severity(op)) {
        if throttle.should_log() {
            log_worker_warn!("Unexpected subsystem error",
                worker = %ctx.id(),
                op = ?op,
                error = %err,
                occurrences = throttle.seen());
        }
    } else {
        log_worker_debug!("Expected race", worker = %ctx.id(), op = ?op, error = %err);
    }
}
