//! The watched subsystem as seen by the harness.
//!
//! Workers only need to open/close an instance, add/remove a watch, and pull
//! raw event bytes off an instance. [`WatchSubsystem`] is that surface; the
//! Linux implementation lives in [`crate::inotify`], mocks in
//! [`crate::testing`].

use std::fmt;
use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;

use crate::error::Severity;

/// `IN_ALL_EVENTS`: every inotify event a watch can report.
#[cfg(target_os = "linux")]
pub const ALL_EVENTS: u32 = libc::IN_ALL_EVENTS;

#[cfg(not(target_os = "linux"))]
pub const ALL_EVENTS: u32 = 0x0000_0fff;

/// Opaque per-instance handle. For inotify this is the instance fd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceHandle(i32);

impl InstanceHandle {
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}", self.0)
    }
}

/// Which collaborator call failed. Classification depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Open,
    Register,
    Unregister,
    Read,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubsystemError {
    /// Target object (register) or descriptor (unregister) does not exist
    #[error("no such object or watch descriptor")]
    NotFound,

    #[error("resource exhausted: {0}")]
    ResourceExhausted(Errno),

    #[error("operation would block")]
    WouldBlock,

    #[error("instance handle is closed")]
    Closed,

    #[error("{0}")]
    Os(Errno),
}

impl SubsystemError {
    /// Map a raw errno from `op` onto the harness taxonomy.
    ///
    /// The kernel reports an unknown watch descriptor to `inotify_rm_watch`
    /// as `EINVAL`, so that is what "not found" means for unregister.
    pub fn from_errno(op: Op, errno: Errno) -> Self {
        match (op, errno) {
            (Op::Register, Errno::ENOENT) => SubsystemError::NotFound,
            (Op::Unregister, Errno::EINVAL) => SubsystemError::NotFound,
            (_, Errno::ENOSPC | Errno::EMFILE | Errno::ENFILE | Errno::ENOMEM) => {
                SubsystemError::ResourceExhausted(errno)
            }
            (_, Errno::EAGAIN) => SubsystemError::WouldBlock,
            (_, Errno::EBADF) => SubsystemError::Closed,
            _ => SubsystemError::Os(errno),
        }
    }

    pub fn severity(&self, op: Op) -> Severity {
        match (op, self) {
            (Op::Register | Op::Unregister, SubsystemError::NotFound) => Severity::ExpectedRace,
            // Another drainer on the same instance won the read
            (Op::Read, SubsystemError::WouldBlock) => Severity::ExpectedRace,
            _ => Severity::Unexpected,
        }
    }
}

/// External collaborator: one watch-descriptor subsystem.
///
/// Every method may be called concurrently from many threads on the same
/// handle; implementations must not serialize those calls.
pub trait WatchSubsystem: Send + Sync {
    fn open_instance(&self) -> Result<InstanceHandle, SubsystemError>;

    /// Register interest in `path`; returns the new watch descriptor.
    fn register(&self, handle: InstanceHandle, path: &Path, mask: u32)
        -> Result<i32, SubsystemError>;

    fn unregister(&self, handle: InstanceHandle, wd: i32) -> Result<(), SubsystemError>;

    /// Read pending event bytes into `buf`, waiting at most `timeout`.
    /// `Ok(0)` means nothing arrived in time.
    fn read_events(
        &self,
        handle: InstanceHandle,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, SubsystemError>;

    fn close_instance(&self, handle: InstanceHandle) -> Result<(), SubsystemError>;
}
