//! Run orchestration: startup, worker spawning and ordered teardown.

use std::fs;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use wdthrash_config::{
    log_harness_debug, log_harness_error, log_harness_info, log_harness_warn, log_worker_debug,
    Config,
};

use crate::bounds::BoundsTracker;
use crate::churn::FileChurnSet;
use crate::error::{HarnessError, ResourceError};
use crate::instance::SubsystemInstance;
use crate::mount::{MountSpec, Mounter};
use crate::report::{ExitReport, HungWorker};
use crate::roles::{
    Adder, BoundsResetter, EventDrainer, FileChurner, InstanceBinding, MountChurner,
    NearLowCloser, RangeCloser,
};
use crate::stop::StopSignal;
use crate::subsystem::WatchSubsystem;
use crate::worker::{Role, RoleWorker, WorkerContext, WorkerId, WorkerSlot, WorkerState, WorkerStats};

/// How often `join` checks for finished workers.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Entry point: binds the collaborators a run drives.
#[derive(Clone)]
pub struct Harness {
    subsystem: Arc<dyn WatchSubsystem>,
    mounter: Arc<dyn Mounter>,
}

impl Harness {
    pub fn new(subsystem: Arc<dyn WatchSubsystem>, mounter: Arc<dyn Mounter>) -> Self {
        Self { subsystem, mounter }
    }

    /// Real inotify and real mount(2).
    #[cfg(target_os = "linux")]
    pub fn linux() -> Self {
        Self::new(
            Arc::new(crate::inotify::InotifySubsystem::new()),
            Arc::new(crate::mount::NixMounter),
        )
    }

    /// Validate `config`, create the working directory, open every instance
    /// and spawn every worker.
    ///
    /// On failure whatever was already set up is torn down again before the
    /// error is returned.
    pub fn start(&self, config: Config) -> Result<RunHandle, HarnessError> {
        config.validate()?;

        log_harness_info!("Starting run",
            instances = config.instance_count,
            workers = config.total_workers(),
            working_dir = %config.working_dir.display(),
            mount_churn = config.mount.enabled);

        fs::create_dir_all(&config.working_dir).map_err(|source| ResourceError::WorkingDir {
            path: config.working_dir.clone(),
            source,
        })?;

        let mut run = RunHandle::new(config, self.subsystem.clone(), self.mounter.clone());

        for index in 0..run.config.instance_count {
            match SubsystemInstance::open(self.subsystem.as_ref(), index) {
                Ok(instance) => {
                    log_harness_debug!("Instance opened", index, handle = %instance.handle());
                    run.instances.push(Arc::new(instance));
                }
                Err(source) => {
                    log_harness_error!("Failed to open instance", index, error = %source);
                    run.abort();
                    return Err(ResourceError::OpenInstance { index, source }.into());
                }
            }
        }

        if let Err(e) = run.spawn_all() {
            log_harness_error!("Failed to spawn worker", error = %e);
            run.abort();
            return Err(e.into());
        }

        log_harness_info!("All workers started", workers = run.workers.len());
        Ok(run)
    }
}

struct SpawnedWorker {
    id: WorkerId,
    slot: Arc<WorkerSlot>,
    handle: JoinHandle<WorkerStats>,
}

/// A started run. Dropping it requests a stop without waiting.
pub struct RunHandle {
    config: Config,
    subsystem: Arc<dyn WatchSubsystem>,
    mounter: Arc<dyn Mounter>,
    stop: StopSignal,
    bounds: Arc<BoundsTracker>,
    churn_set: Arc<FileChurnSet>,
    instances: Vec<Arc<SubsystemInstance>>,
    workers: Vec<SpawnedWorker>,
    ready_tx: Sender<WorkerId>,
    ready_rx: Receiver<WorkerId>,
    started_at: Instant,
}

impl RunHandle {
    fn new(config: Config, subsystem: Arc<dyn WatchSubsystem>, mounter: Arc<dyn Mounter>) -> Self {
        let churn_set = Arc::new(FileChurnSet::new(&config.working_dir, config.watcher_threads));
        let (ready_tx, ready_rx) = crossbeam_channel::unbounded();
        Self {
            config,
            subsystem,
            mounter,
            stop: StopSignal::new(),
            bounds: Arc::new(BoundsTracker::new()),
            churn_set,
            instances: Vec::new(),
            workers: Vec::new(),
            ready_tx,
            ready_rx,
            started_at: Instant::now(),
        }
    }

    /// Request a stop. `true` only for the first request.
    pub fn stop(&self) -> bool {
        let first = self.stop.trigger();
        if first {
            log_harness_info!("Stop requested");
        }
        first
    }

    /// A clone of the run's stop signal, for handing to a signal listener.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn bounds(&self) -> Arc<BoundsTracker> {
        self.bounds.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Current state of every spawned worker.
    pub fn worker_states(&self) -> Vec<(WorkerId, WorkerState)> {
        self.workers.iter().map(|w| (w.id, w.slot.state())).collect()
    }

    fn spawn_all(&mut self) -> Result<(), ResourceError> {
        let instances = self.instances.clone();
        for instance in &instances {
            let i = instance.index();
            let binding = InstanceBinding::new(self.subsystem.clone(), instance.clone());

            let adders = self.config.adders_per_instance();
            for idx in 0..adders {
                let path = self.churn_set.path(idx).to_path_buf();
                let worker = Adder::new(binding.clone(), self.bounds.clone(), path);
                self.spawn(WorkerId::per_instance(Role::Adder, idx, i), worker)?;
            }
            self.await_ready(Role::Adder, Some(i), adders);

            for idx in 0..self.config.closer_threads {
                let worker = RangeCloser::new(binding.clone(), self.bounds.clone());
                self.spawn(WorkerId::per_instance(Role::RangeCloser, idx, i), worker)?;
            }
            self.await_ready(Role::RangeCloser, Some(i), self.config.closer_threads);

            for idx in 0..self.config.near_low_closer_threads {
                let worker = NearLowCloser::new(binding.clone(), self.bounds.clone());
                self.spawn(WorkerId::per_instance(Role::NearLowCloser, idx, i), worker)?;
            }
            self.await_ready(Role::NearLowCloser, Some(i), self.config.near_low_closer_threads);

            for idx in 0..self.config.data_dumper_threads {
                let worker = EventDrainer::new(binding.clone(), self.config.timing.drain_timeout);
                self.spawn(WorkerId::per_instance(Role::EventDrainer, idx, i), worker)?;
            }
            self.await_ready(Role::EventDrainer, Some(i), self.config.data_dumper_threads);
        }

        for idx in 0..self.config.file_churner_threads {
            let worker = FileChurner::new(
                self.churn_set.clone(),
                self.config.timing.file_churn_interval,
            );
            self.spawn(WorkerId::process_wide(Role::FileChurner, idx), worker)?;
        }
        self.await_ready(Role::FileChurner, None, self.config.file_churner_threads);

        let resetter = BoundsResetter::new(self.bounds.clone(), self.config.timing.bounds_reset_interval);
        self.spawn(WorkerId::process_wide(Role::BoundsResetter, 0), resetter)?;
        self.await_ready(Role::BoundsResetter, None, 1);

        if self.config.mount.enabled {
            let spec = MountSpec::from_config(&self.config.mount, &self.config.working_dir);
            let worker = MountChurner::new(
                self.mounter.clone(),
                spec,
                self.config.timing.mount_hold,
                self.config.timing.mount_settle,
            );
            self.spawn(WorkerId::process_wide(Role::MountChurner, 0), worker)?;
            self.await_ready(Role::MountChurner, None, 1);
        }
        Ok(())
    }

    fn spawn<W: RoleWorker>(&mut self, id: WorkerId, mut worker: W) -> Result<(), ResourceError> {
        debug_assert_eq!(worker.role(), id.role);
        let slot = Arc::new(WorkerSlot::default());
        let ready = self.config.rendezvous.then(|| self.ready_tx.clone());
        let mut ctx = WorkerContext::new(id, self.stop.clone(), slot.clone(), ready);

        let handle = thread::Builder::new()
            .name(id.thread_name())
            .stack_size(self.config.stack_size)
            .spawn(move || {
                log_worker_debug!("Worker started", worker = %id);
                let stats = worker.run(&mut ctx);
                log_worker_debug!("Worker stopped",
                    worker = %id,
                    iterations = stats.iterations,
                    unexpected = stats.unexpected_errors);
                stats
            })
            .map_err(|source| ResourceError::Spawn {
                worker: id.to_string(),
                source,
            })?;

        self.workers.push(SpawnedWorker { id, slot, handle });
        Ok(())
    }

    /// Wait until `expected` workers of one group have entered their loop,
    /// or give up after the rendezvous timeout.
    fn await_ready(&self, role: Role, instance: Option<usize>, expected: usize) {
        if !self.config.rendezvous || expected == 0 {
            return;
        }
        let deadline = Instant::now() + self.config.timing.rendezvous_timeout;
        let ready = wait_for_group(&self.ready_rx, role, instance, expected, deadline);
        if ready < expected {
            log_harness_debug!("Rendezvous timed out", role = %role, ready, expected);
        }
    }

    /// Tear down a partially started run.
    fn abort(self) {
        self.stop.trigger();
        let report = self.join();
        log_harness_warn!("Startup aborted",
            workers_joined = report.workers_joined,
            instances_closed = report.instances_closed,
            working_dir_removed = report.working_dir_removed);
    }

    /// Wait for every worker, then close every instance and remove the
    /// working directory.
    ///
    /// Blocks until a stop has been requested and every worker has returned.
    /// Once stop is set, workers get `join_grace` to finish; any still running
    /// after that are reported as hung. Their instances stay open and the
    /// working directory is left in place.
    pub fn join(mut self) -> ExitReport {
        let mut pending = std::mem::take(&mut self.workers);
        let instances = std::mem::take(&mut self.instances);
        let mut report = ExitReport {
            workers_started: pending.len(),
            ..Default::default()
        };

        log_harness_debug!("Joining workers", workers = pending.len());
        let mut grace_deadline: Option<Instant> = None;
        loop {
            let (finished, running): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|w| w.handle.is_finished());
            pending = running;
            for worker in finished {
                reap(worker, &mut report);
            }
            if pending.is_empty() {
                break;
            }

            if self.stop.is_set() {
                let grace = self.config.timing.join_grace;
                let deadline = *grace_deadline.get_or_insert_with(|| Instant::now() + grace);
                if Instant::now() >= deadline {
                    break;
                }
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        for worker in pending {
            let state = worker.slot.state();
            log_harness_error!("Worker did not stop within grace period",
                worker = %worker.id,
                state = %state);
            report.hung.push(HungWorker {
                id: worker.id,
                state,
            });
        }

        self.close_instances(instances, &mut report);

        if report.hung.is_empty() {
            report.working_dir_removed = self.remove_working_dir();
        } else {
            log_harness_warn!("Leaving working directory in place",
                working_dir = %self.config.working_dir.display(),
                hung = report.hung.len());
        }

        report.elapsed = self.started_at.elapsed();
        log_harness_info!("Run finished",
            started = report.workers_started,
            joined = report.workers_joined,
            hung = report.hung.len(),
            panicked = report.panicked.len(),
            unexpected_errors = report.totals().unexpected_errors);
        report
    }

    fn close_instances(&self, instances: Vec<Arc<SubsystemInstance>>, report: &mut ExitReport) {
        for instance in instances {
            match Arc::try_unwrap(instance) {
                Ok(instance) => {
                    let index = instance.index();
                    match instance.close(self.subsystem.as_ref()) {
                        Ok(()) => {
                            report.instances_closed += 1;
                            log_harness_debug!("Instance closed", index);
                        }
                        Err(e) => {
                            report.close_errors += 1;
                            log_harness_warn!("Failed to close instance", index, error = %e);
                        }
                    }
                }
                Err(shared) => {
                    report.instances_leaked += 1;
                    log_harness_warn!("Instance still in use by a hung worker, not closing",
                        index = shared.index());
                }
            }
        }
    }

    fn remove_working_dir(&self) -> bool {
        // Churners clean up on stop; this catches files recreated after that
        let leftovers = self.churn_set.remove_all();
        if leftovers.failed > 0 {
            log_harness_warn!("Could not remove every backing file", failed = leftovers.failed);
        }

        let dir = &self.config.working_dir;
        match fs::remove_dir(dir) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                log_harness_warn!("Failed to remove working directory",
                    working_dir = %dir.display(),
                    error = %e);
                false
            }
        }
    }
}

/// Count readiness reports from `role` on `instance` until `expected` arrive
/// or `deadline` passes. Late reports from an earlier group are dropped.
fn wait_for_group(
    ready_rx: &Receiver<WorkerId>,
    role: Role,
    instance: Option<usize>,
    expected: usize,
    deadline: Instant,
) -> usize {
    let mut ready = 0;
    while ready < expected {
        match ready_rx.recv_deadline(deadline) {
            Ok(id) if id.role == role && id.instance == instance => ready += 1,
            Ok(id) => log_harness_debug!("Late readiness report", worker = %id),
            Err(_) => break,
        }
    }
    ready
}

fn reap(worker: SpawnedWorker, report: &mut ExitReport) {
    match worker.handle.join() {
        Ok(stats) => report.record(worker.id.role, stats),
        Err(_) => {
            log_harness_error!("Worker panicked", worker = %worker.id);
            report.panicked.push(worker.id);
        }
    }
    worker.slot.advance(WorkerState::Joined);
    report.workers_joined += 1;
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn soon() -> Instant {
        Instant::now() + Duration::from_millis(50)
    }

    #[test]
    fn test_late_report_from_previous_group_not_counted() {
        let (tx, rx) = crossbeam_channel::unbounded();
        // Straggler from instance 0 arrives while instance 1 is coming up
        tx.send(WorkerId::per_instance(Role::EventDrainer, 0, 0)).unwrap();
        tx.send(WorkerId::per_instance(Role::Adder, 0, 1)).unwrap();

        let ready = wait_for_group(&rx, Role::Adder, Some(1), 2, soon());
        assert_eq!(ready, 1);
    }

    #[test]
    fn test_group_complete() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(WorkerId::process_wide(Role::FileChurner, 0)).unwrap();
        tx.send(WorkerId::process_wide(Role::FileChurner, 1)).unwrap();
        tx.send(WorkerId::process_wide(Role::BoundsResetter, 0)).unwrap();

        assert_eq!(wait_for_group(&rx, Role::FileChurner, None, 2, soon()), 2);
        // The resetter's report is still queued for its own group
        assert_eq!(wait_for_group(&rx, Role::BoundsResetter, None, 1, soon()), 1);
    }
}
