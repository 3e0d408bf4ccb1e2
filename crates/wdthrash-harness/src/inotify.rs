//! Linux inotify as a [`WatchSubsystem`].
//!
//! Raw libc calls on purpose: the range closers hand arbitrary integers to
//! `inotify_rm_watch`, which no typed watch-descriptor wrapper allows.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;

use crate::subsystem::{InstanceHandle, Op, SubsystemError, WatchSubsystem};

/// Stateless; every call goes straight to the kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct InotifySubsystem;

impl InotifySubsystem {
    pub fn new() -> Self {
        Self
    }
}

fn last_error(op: Op) -> SubsystemError {
    SubsystemError::from_errno(op, Errno::last())
}

impl WatchSubsystem for InotifySubsystem {
    fn open_instance(&self) -> Result<InstanceHandle, SubsystemError> {
        // Non-blocking so a drainer never parks in read(2) past its poll
        let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if fd < 0 {
            return Err(last_error(Op::Open));
        }
        Ok(InstanceHandle::from_raw(fd))
    }

    fn register(
        &self,
        handle: InstanceHandle,
        path: &Path,
        mask: u32,
    ) -> Result<i32, SubsystemError> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| SubsystemError::Os(Errno::EINVAL))?;

        let wd = unsafe { libc::inotify_add_watch(handle.raw(), c_path.as_ptr(), mask) };
        if wd < 0 {
            return Err(last_error(Op::Register));
        }
        Ok(wd)
    }

    fn unregister(&self, handle: InstanceHandle, wd: i32) -> Result<(), SubsystemError> {
        let ret = unsafe { libc::inotify_rm_watch(handle.raw(), wd) };
        if ret < 0 {
            return Err(last_error(Op::Unregister));
        }
        Ok(())
    }

    fn read_events(
        &self,
        handle: InstanceHandle,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, SubsystemError> {
        let mut pfd = libc::pollfd {
            fd: handle.raw(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ready < 0 {
            let errno = Errno::last();
            if errno == Errno::EINTR {
                return Ok(0);
            }
            return Err(SubsystemError::from_errno(Op::Read, errno));
        }
        if ready == 0 {
            return Ok(0);
        }
        if pfd.revents & libc::POLLNVAL != 0 {
            return Err(SubsystemError::Closed);
        }

        let n = unsafe { libc::read(handle.raw(), buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(last_error(Op::Read));
        }
        Ok(n as usize)
    }

    fn close_instance(&self, handle: InstanceHandle) -> Result<(), SubsystemError> {
        let ret = unsafe { libc::close(handle.raw()) };
        if ret < 0 {
            return Err(last_error(Op::Close));
        }
        Ok(())
    }
}
