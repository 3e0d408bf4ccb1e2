//! Worker identity, lifecycle state and the loop contract every role follows.

use std::fmt;
use std::ops::AddAssign;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use serde::Serialize;

use crate::error::Severity;
use crate::stop::StopSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Adder,
    RangeCloser,
    NearLowCloser,
    EventDrainer,
    FileChurner,
    BoundsResetter,
    MountChurner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Adder => "adder",
            Role::RangeCloser => "range-closer",
            Role::NearLowCloser => "near-low-closer",
            Role::EventDrainer => "event-drainer",
            Role::FileChurner => "file-churner",
            Role::BoundsResetter => "bounds-resetter",
            Role::MountChurner => "mount-churner",
        }
    }

    /// Bound to one subsystem instance rather than shared by the run.
    pub fn is_per_instance(&self) -> bool {
        matches!(
            self,
            Role::Adder | Role::RangeCloser | Role::NearLowCloser | Role::EventDrainer
        )
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `adder#3@1` is the fourth adder on instance 1; process-wide workers
/// have no `@` part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WorkerId {
    pub role: Role,
    pub index: usize,
    pub instance: Option<usize>,
}

impl WorkerId {
    pub fn per_instance(role: Role, index: usize, instance: usize) -> Self {
        debug_assert!(role.is_per_instance(), "{} is process-wide", role);
        Self {
            role,
            index,
            instance: Some(instance),
        }
    }

    pub fn process_wide(role: Role, index: usize) -> Self {
        debug_assert!(!role.is_per_instance(), "{} is per-instance", role);
        Self {
            role,
            index,
            instance: None,
        }
    }

    /// OS thread name. Linux truncates to 15 bytes, so keep it short.
    pub fn thread_name(&self) -> String {
        let short = match self.role {
            Role::Adder => "add",
            Role::RangeCloser => "rm",
            Role::NearLowCloser => "rmlo",
            Role::EventDrainer => "drain",
            Role::FileChurner => "churn",
            Role::BoundsResetter => "reset",
            Role::MountChurner => "mount",
        };
        match self.instance {
            Some(instance) => format!("{}{}@{}", short, self.index, instance),
            None => format!("{}{}", short, self.index),
        }
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.role, self.index)?;
        if let Some(instance) = self.instance {
            write!(f, "@{}", instance)?;
        }
        Ok(())
    }
}

/// Lifecycle of one worker thread. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WorkerState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Joined = 3,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => WorkerState::Created,
            1 => WorkerState::Running,
            2 => WorkerState::Stopping,
            _ => WorkerState::Joined,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Created => "created",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Joined => "joined",
        };
        f.write_str(s)
    }
}

/// State cell shared between a worker thread and the harness.
#[derive(Debug)]
pub struct WorkerSlot {
    state: AtomicU8,
}

impl Default for WorkerSlot {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Created as u8),
        }
    }
}

impl WorkerSlot {
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` unless already past it.
    pub fn advance(&self, next: WorkerState) {
        self.state.fetch_max(next as u8, Ordering::AcqRel);
    }
}

/// Per-worker handle on the run: its identity, the stop signal and the
/// readiness rendezvous.
pub struct WorkerContext {
    id: WorkerId,
    stop: StopSignal,
    slot: Arc<WorkerSlot>,
    started: bool,
    ready: Option<Sender<WorkerId>>,
}

impl WorkerContext {
    pub fn new(
        id: WorkerId,
        stop: StopSignal,
        slot: Arc<WorkerSlot>,
        ready: Option<Sender<WorkerId>>,
    ) -> Self {
        Self {
            id,
            stop,
            slot,
            started: false,
            ready,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Loop guard. Call once at the top of every iteration.
    ///
    /// The first call marks the worker running and reports readiness. Once
    /// stop has been requested the worker is marked stopping and `false` is
    /// returned; the caller must then return promptly.
    pub fn should_run(&mut self) -> bool {
        if !self.started {
            self.started = true;
            self.slot.advance(WorkerState::Running);
            if let Some(ready) = self.ready.take() {
                // Nobody waiting any more is fine
                let _ = ready.send(self.id);
            }
        }
        if self.stop.is_set() {
            self.slot.advance(WorkerState::Stopping);
            return false;
        }
        true
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_set()
    }

    /// Interruptible sleep. `false` if stop cut it short.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.stop.sleep(duration)
    }
}

/// Counters a worker returns when its loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub iterations: u64,
    /// Subsystem or filesystem calls that succeeded
    pub successes: u64,
    pub expected_races: u64,
    pub unexpected_errors: u64,
    pub bytes_drained: u64,
}

impl WorkerStats {
    /// Count a failure. Returns `true` if it is worth a warning.
    pub fn record_failure(&mut self, severity: Severity) -> bool {
        match severity {
            Severity::ExpectedRace => {
                self.expected_races += 1;
                false
            }
            Severity::Unexpected => {
                self.unexpected_errors += 1;
                true
            }
        }
    }
}

impl AddAssign for WorkerStats {
    fn add_assign(&mut self, rhs: Self) {
        self.iterations += rhs.iterations;
        self.successes += rhs.successes;
        self.expected_races += rhs.expected_races;
        self.unexpected_errors += rhs.unexpected_errors;
        self.bytes_drained += rhs.bytes_drained;
    }
}

/// Keeps a hot loop from flooding the log with the same failure: fires on
/// the 1st, 2nd, 4th, 8th, ... occurrence.
#[derive(Debug, Default)]
pub struct ErrorThrottle {
    seen: u64,
}

impl ErrorThrottle {
    pub fn should_log(&mut self) -> bool {
        self.seen += 1;
        self.seen.is_power_of_two()
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }
}

/// One racing role. `run` loops until [`WorkerContext::should_run`] returns
/// `false`, then returns its counters. It must never block on anything other
/// than a bounded subsystem call or [`WorkerContext::sleep`].
pub trait RoleWorker: Send + 'static {
    fn role(&self) -> Role;

    fn run(&mut self, ctx: &mut WorkerContext) -> WorkerStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_display() {
        let id = WorkerId::per_instance(Role::Adder, 3, 1);
        assert_eq!(id.to_string(), "adder#3@1");
        assert_eq!(id.thread_name(), "add3@1");

        let id = WorkerId::process_wide(Role::BoundsResetter, 0);
        assert_eq!(id.to_string(), "bounds-resetter#0");
        assert!(id.thread_name().len() <= 15);
    }

    #[test]
    fn test_role_scope() {
        assert!(Role::Adder.is_per_instance());
        assert!(Role::EventDrainer.is_per_instance());
        assert!(!Role::FileChurner.is_per_instance());
        assert!(!Role::MountChurner.is_per_instance());
    }

    #[test]
    fn test_slot_never_moves_backwards() {
        let slot = WorkerSlot::default();
        assert_eq!(slot.state(), WorkerState::Created);
        slot.advance(WorkerState::Stopping);
        slot.advance(WorkerState::Running);
        assert_eq!(slot.state(), WorkerState::Stopping);
        slot.advance(WorkerState::Joined);
        assert_eq!(slot.state(), WorkerState::Joined);
    }

    #[test]
    fn test_should_run_reports_ready_once_and_honours_stop() {
        let stop = StopSignal::new();
        let slot = Arc::new(WorkerSlot::default());
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = WorkerId::process_wide(Role::FileChurner, 0);
        let mut ctx = WorkerContext::new(id, stop.clone(), slot.clone(), Some(tx));

        assert!(ctx.should_run());
        assert!(ctx.should_run());
        assert_eq!(slot.state(), WorkerState::Running);
        assert_eq!(rx.try_recv().unwrap(), id);
        assert!(rx.try_recv().is_err());

        stop.trigger();
        assert!(!ctx.should_run());
        assert_eq!(slot.state(), WorkerState::Stopping);
    }

    #[test]
    fn test_stats_accumulate() {
        let mut total = WorkerStats::default();
        let mut one = WorkerStats {
            iterations: 5,
            successes: 3,
            ..Default::default()
        };
        assert!(!one.record_failure(Severity::ExpectedRace));
        assert!(one.record_failure(Severity::Unexpected));

        total += one;
        total += one;
        assert_eq!(total.iterations, 10);
        assert_eq!(total.expected_races, 2);
        assert_eq!(total.unexpected_errors, 2);
    }

    #[test]
    fn test_throttle_fires_on_powers_of_two() {
        let mut throttle = ErrorThrottle::default();
        let mut fired = Vec::new();
        for _ in 1..=20 {
            if throttle.should_log() {
                fired.push(throttle.seen());
            }
        }
        assert_eq!(fired, vec![1, 2, 4, 8, 16]);
    }
}
