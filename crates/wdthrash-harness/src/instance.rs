use crate::subsystem::{InstanceHandle, SubsystemError, WatchSubsystem};

/// One open subsystem instance.
///
/// Owned by the run and shared with its workers as `Arc<SubsystemInstance>`.
/// [`close`](Self::close) consumes the instance, so the run can only close
/// it once it holds the last reference, i.e. after every worker bound to it
/// has returned. Dropping without closing leaks the handle.
#[derive(Debug)]
#[must_use = "instances must be closed explicitly"]
pub struct SubsystemInstance {
    handle: InstanceHandle,
    index: usize,
}

impl SubsystemInstance {
    pub fn open(subsystem: &dyn WatchSubsystem, index: usize) -> Result<Self, SubsystemError> {
        let handle = subsystem.open_instance()?;
        Ok(Self { handle, index })
    }

    pub fn handle(&self) -> InstanceHandle {
        self.handle
    }

    /// Position among the run's instances, `0..instance_count`.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn close(self, subsystem: &dyn WatchSubsystem) -> Result<(), SubsystemError> {
        subsystem.close_instance(self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{LifecycleCall, MockSubsystem};

    #[test]
    fn test_open_then_close_records_both() {
        let mock = MockSubsystem::new();
        let instance = SubsystemInstance::open(&mock, 3).unwrap();
        let handle = instance.handle();
        assert_eq!(instance.index(), 3);

        instance.close(&mock).unwrap();
        assert_eq!(
            mock.lifecycle(),
            vec![LifecycleCall::Open(handle), LifecycleCall::Close(handle)]
        );
    }
}
