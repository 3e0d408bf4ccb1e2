//! End-of-run summary.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::worker::{Role, WorkerId, WorkerState, WorkerStats};

/// A worker still running when the join grace period ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HungWorker {
    pub id: WorkerId,
    /// Last state the worker reported
    pub state: WorkerState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoleSummary {
    pub workers: usize,
    pub stats: WorkerStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExitReport {
    pub workers_started: usize,
    pub workers_joined: usize,
    pub hung: Vec<HungWorker>,
    pub panicked: Vec<WorkerId>,
    pub instances_closed: usize,
    /// Instances left open because a hung worker still holds them
    pub instances_leaked: usize,
    pub close_errors: usize,
    pub working_dir_removed: bool,
    pub roles: BTreeMap<Role, RoleSummary>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl ExitReport {
    /// Every worker returned and every resource was released.
    pub fn is_clean(&self) -> bool {
        self.hung.is_empty()
            && self.panicked.is_empty()
            && self.instances_leaked == 0
            && self.close_errors == 0
            && self.working_dir_removed
    }

    pub fn totals(&self) -> WorkerStats {
        let mut total = WorkerStats::default();
        for summary in self.roles.values() {
            total += summary.stats;
        }
        total
    }

    pub(crate) fn record(&mut self, role: Role, stats: WorkerStats) {
        let summary = self.roles.entry(role).or_default();
        summary.workers += 1;
        summary.stats += stats;
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "wdthrash run finished after {:.1}s", self.elapsed.as_secs_f64())?;
        writeln!(
            f,
            "  workers: {} started, {} joined",
            self.workers_started, self.workers_joined
        )?;
        writeln!(
            f,
            "  instances: {} closed, {} leaked, {} close errors",
            self.instances_closed, self.instances_leaked, self.close_errors
        )?;
        writeln!(
            f,
            "  working directory removed: {}",
            if self.working_dir_removed { "yes" } else { "no" }
        )?;

        writeln!(
            f,
            "  {:<16} {:>4} {:>12} {:>12} {:>12} {:>10}",
            "role", "n", "iterations", "ok", "races", "unexpected"
        )?;
        for (role, summary) in &self.roles {
            let s = &summary.stats;
            writeln!(
                f,
                "  {:<16} {:>4} {:>12} {:>12} {:>12} {:>10}",
                role.as_str(),
                summary.workers,
                s.iterations,
                s.successes,
                s.expected_races,
                s.unexpected_errors
            )?;
        }

        for hung in &self.hung {
            writeln!(f, "  HUNG: {} (last state: {})", hung.id, hung.state)?;
        }
        for id in &self.panicked {
            writeln!(f, "  PANICKED: {}", id)?;
        }
        Ok(())
    }
}
