//! # wdthrash-harness
//!
//! Concurrent stress harness for inotify watch descriptor allocation and
//! invalidation.
//!
//! ## Architecture
//!
//! A [`Harness`] opens one or more subsystem instances and drives a set of
//! racing roles against them, each on its own OS thread:
//! - Adders register watches on churned backing files and widen the shared
//!   descriptor bounds
//! - RangeClosers and NearLowClosers invalidate descriptors inside those bounds
//! - EventDrainers keep the event queues from filling
//! - FileChurners, the BoundsResetter and the MountChurner run process-wide
//!
//! Workers stop cooperatively on a shared [`StopSignal`]. [`RunHandle::join`]
//! waits for them, then closes every instance and removes the working
//! directory, producing an [`ExitReport`].
//!
//! The subsystem and the mount syscalls sit behind the [`WatchSubsystem`] and
//! [`Mounter`] traits so tests can swap in the mocks from [`testing`].

pub mod backoff;
pub mod bounds;
pub mod churn;
pub mod error;
pub mod harness;
#[cfg(target_os = "linux")]
pub mod inotify;
pub mod instance;
pub mod mount;
pub mod report;
pub mod roles;
pub mod stop;
pub mod subsystem;
pub mod testing;
pub mod worker;

pub use bounds::{BoundsTracker, LOW_SENTINEL};
pub use churn::FileChurnSet;
pub use error::{HarnessError, ResourceError, Severity};
pub use harness::{Harness, RunHandle};
#[cfg(target_os = "linux")]
pub use inotify::InotifySubsystem;
pub use instance::SubsystemInstance;
pub use mount::{MountSpec, Mounter, NixMounter};
pub use report::{ExitReport, HungWorker, RoleSummary};
pub use stop::StopSignal;
pub use subsystem::{InstanceHandle, Op, SubsystemError, WatchSubsystem, ALL_EVENTS};
pub use worker::{Role, RoleWorker, WorkerContext, WorkerId, WorkerState, WorkerStats};
