//! Test doubles for the subsystem and mount collaborators.
//!
//! # Usage
//!
//! ```ignore
//! use wdthrash_harness::testing::{MockSubsystem, RecordingMounter, RegisterScript};
//!
//! let mock = Arc::new(MockSubsystem::new().with_register(RegisterScript::Fixed(5)));
//! let harness = Harness::new(mock.clone(), Arc::new(RecordingMounter::new()));
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::errno::Errno;

use crate::mount::{MountSpec, Mounter};
use crate::stop::StopSignal;
use crate::subsystem::{InstanceHandle, SubsystemError, WatchSubsystem};
use crate::worker::{RoleWorker, WorkerContext, WorkerId, WorkerSlot, WorkerStats};

/// Handles a mock can track; later opens fail with `EMFILE`.
pub const MAX_MOCK_INSTANCES: usize = 64;

/// Unregister targets kept for inspection. Later ones are only counted.
const UNREGISTER_LOG_CAP: usize = 4096;

/// First handle value the mock hands out.
const FIRST_HANDLE: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterScript {
    /// `start`, `start + 1`, ... shared across instances
    Sequential { start: i32 },
    /// Same descriptor every time
    Fixed(i32),
    /// Backing file always missing
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterScript {
    Ok,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleCall {
    Open(InstanceHandle),
    Close(InstanceHandle),
}

/// Scriptable in-memory [`WatchSubsystem`].
///
/// Records open/close order and counts any call made on a handle that is
/// already closed, so teardown ordering can be asserted.
pub struct MockSubsystem {
    register_script: RegisterScript,
    unregister_script: UnregisterScript,
    fail_open_at: Option<usize>,
    read_stall: Option<Duration>,
    next_wd: AtomicI32,
    opens: AtomicUsize,
    open_flags: Vec<AtomicBool>,
    lifecycle: Mutex<Vec<LifecycleCall>>,
    unregistered: Mutex<Vec<i32>>,
    register_calls: AtomicU64,
    unregister_calls: AtomicU64,
    read_calls: AtomicU64,
    closes: AtomicU64,
    use_after_close: AtomicU64,
}

impl Default for MockSubsystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSubsystem {
    pub fn new() -> Self {
        Self {
            register_script: RegisterScript::Sequential { start: 1 },
            unregister_script: UnregisterScript::Ok,
            fail_open_at: None,
            read_stall: None,
            next_wd: AtomicI32::new(1),
            opens: AtomicUsize::new(0),
            open_flags: (0..MAX_MOCK_INSTANCES).map(|_| AtomicBool::new(false)).collect(),
            lifecycle: Mutex::new(Vec::new()),
            unregistered: Mutex::new(Vec::new()),
            register_calls: AtomicU64::new(0),
            unregister_calls: AtomicU64::new(0),
            read_calls: AtomicU64::new(0),
            closes: AtomicU64::new(0),
            use_after_close: AtomicU64::new(0),
        }
    }

    pub fn with_register(mut self, script: RegisterScript) -> Self {
        if let RegisterScript::Sequential { start } = script {
            self.next_wd = AtomicI32::new(start);
        }
        self.register_script = script;
        self
    }

    pub fn with_unregister(mut self, script: UnregisterScript) -> Self {
        self.unregister_script = script;
        self
    }

    /// Make the `n`th open (zero-based) fail with `ENOSPC`.
    pub fn fail_open_at(mut self, n: usize) -> Self {
        self.fail_open_at = Some(n);
        self
    }

    /// Make every `read_events` block for `stall`, ignoring its timeout.
    pub fn with_read_stall(mut self, stall: Duration) -> Self {
        self.read_stall = Some(stall);
        self
    }

    pub fn opens(&self) -> usize {
        self.lifecycle()
            .iter()
            .filter(|c| matches!(c, LifecycleCall::Open(_)))
            .count()
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn lifecycle(&self) -> Vec<LifecycleCall> {
        self.lifecycle.lock().unwrap().clone()
    }

    /// Handles opened and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.open_flags
            .iter()
            .filter(|f| f.load(Ordering::SeqCst))
            .count()
    }

    pub fn register_calls(&self) -> u64 {
        self.register_calls.load(Ordering::Relaxed)
    }

    pub fn unregister_calls(&self) -> u64 {
        self.unregister_calls.load(Ordering::Relaxed)
    }

    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::Relaxed)
    }

    /// The first few thousand descriptors passed to `unregister`.
    pub fn unregistered(&self) -> Vec<i32> {
        self.unregistered.lock().unwrap().clone()
    }

    /// Calls made on a handle after it was closed. Must stay 0.
    pub fn use_after_close(&self) -> u64 {
        self.use_after_close.load(Ordering::SeqCst)
    }

    fn slot(&self, handle: InstanceHandle) -> Option<&AtomicBool> {
        let idx = usize::try_from(handle.raw() - FIRST_HANDLE).ok()?;
        self.open_flags.get(idx)
    }

    fn check_open(&self, handle: InstanceHandle) -> Result<(), SubsystemError> {
        match self.slot(handle) {
            Some(flag) if flag.load(Ordering::SeqCst) => Ok(()),
            _ => {
                self.use_after_close.fetch_add(1, Ordering::SeqCst);
                Err(SubsystemError::Closed)
            }
        }
    }
}

impl WatchSubsystem for MockSubsystem {
    fn open_instance(&self) -> Result<InstanceHandle, SubsystemError> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open_at == Some(n) {
            return Err(SubsystemError::ResourceExhausted(Errno::ENOSPC));
        }
        if n >= MAX_MOCK_INSTANCES {
            return Err(SubsystemError::ResourceExhausted(Errno::EMFILE));
        }

        let handle = InstanceHandle::from_raw(FIRST_HANDLE + n as i32);
        self.open_flags[n].store(true, Ordering::SeqCst);
        self.lifecycle.lock().unwrap().push(LifecycleCall::Open(handle));
        Ok(handle)
    }

    fn register(&self, handle: InstanceHandle, _path: &Path, _mask: u32) -> Result<i32, SubsystemError> {
        self.register_calls.fetch_add(1, Ordering::Relaxed);
        self.check_open(handle)?;
        match self.register_script {
            RegisterScript::Sequential { .. } => Ok(self.next_wd.fetch_add(1, Ordering::Relaxed)),
            RegisterScript::Fixed(wd) => Ok(wd),
            RegisterScript::NotFound => Err(SubsystemError::NotFound),
        }
    }

    fn unregister(&self, handle: InstanceHandle, wd: i32) -> Result<(), SubsystemError> {
        self.unregister_calls.fetch_add(1, Ordering::Relaxed);
        self.check_open(handle)?;
        {
            let mut seen = self.unregistered.lock().unwrap();
            if seen.len() < UNREGISTER_LOG_CAP {
                seen.push(wd);
            }
        }
        match self.unregister_script {
            UnregisterScript::Ok => Ok(()),
            UnregisterScript::NotFound => Err(SubsystemError::NotFound),
        }
    }

    fn read_events(
        &self,
        handle: InstanceHandle,
        _buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, SubsystemError> {
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        self.check_open(handle)?;
        thread::sleep(self.read_stall.unwrap_or(timeout.min(Duration::from_millis(1))));
        Ok(0)
    }

    fn close_instance(&self, handle: InstanceHandle) -> Result<(), SubsystemError> {
        let flag = self.slot(handle).ok_or(SubsystemError::Closed)?;
        if !flag.swap(false, Ordering::SeqCst) {
            return Err(SubsystemError::Closed);
        }
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.lifecycle.lock().unwrap().push(LifecycleCall::Close(handle));
        Ok(())
    }
}

/// [`Mounter`] that only counts calls.
#[derive(Debug, Default)]
pub struct RecordingMounter {
    fail_with: Option<Errno>,
    mounts: AtomicU64,
    unmounts: AtomicU64,
    attempts: AtomicU64,
}

impl RecordingMounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every mount fails with `EPERM`, as for an unprivileged user.
    pub fn failing() -> Self {
        Self {
            fail_with: Some(Errno::EPERM),
            ..Self::default()
        }
    }

    /// Successful mounts.
    pub fn mounts(&self) -> u64 {
        self.mounts.load(Ordering::SeqCst)
    }

    pub fn unmounts(&self) -> u64 {
        self.unmounts.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Mounter for RecordingMounter {
    fn mount(&self, _spec: &MountSpec) -> Result<(), Errno> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(errno) = self.fail_with {
            return Err(errno);
        }
        self.mounts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unmount(&self, _target: &Path) -> Result<(), Errno> {
        self.unmounts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Run one worker on its own thread with a private stop signal.
pub fn spawn_worker<W: RoleWorker>(
    mut worker: W,
    id: WorkerId,
) -> (StopSignal, JoinHandle<WorkerStats>) {
    let stop = StopSignal::new();
    let mut ctx = WorkerContext::new(id, stop.clone(), Arc::new(WorkerSlot::default()), None);
    let handle = thread::spawn(move || worker.run(&mut ctx));
    (stop, handle)
}
