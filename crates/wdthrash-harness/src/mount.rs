//! Mount/unmount of a filesystem over the working directory.

use std::path::{Path, PathBuf};

use nix::errno::Errno;
use wdthrash_config::MountConfig;

/// Everything needed for one `mount(2)` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub source: PathBuf,
    pub target: PathBuf,
    pub fstype: String,
    /// Filesystem-specific data string, e.g. `size=1m`
    pub options: Option<String>,
}

impl MountSpec {
    pub fn from_config(config: &MountConfig, target: &Path) -> Self {
        Self {
            source: config.source.clone(),
            target: target.to_path_buf(),
            fstype: config.fstype.clone(),
            options: config.options.clone(),
        }
    }
}

pub trait Mounter: Send + Sync {
    fn mount(&self, spec: &MountSpec) -> Result<(), Errno>;

    /// Detach `target` immediately, even if busy.
    fn unmount(&self, target: &Path) -> Result<(), Errno>;
}

/// The real syscalls. Needs CAP_SYS_ADMIN.
#[derive(Debug, Clone, Copy, Default)]
pub struct NixMounter;

#[cfg(target_os = "linux")]
impl Mounter for NixMounter {
    fn mount(&self, spec: &MountSpec) -> Result<(), Errno> {
        use nix::mount::MsFlags;

        nix::mount::mount(
            Some(spec.source.as_path()),
            spec.target.as_path(),
            Some(spec.fstype.as_str()),
            MsFlags::empty(),
            spec.options.as_deref(),
        )
    }

    fn unmount(&self, target: &Path) -> Result<(), Errno> {
        nix::mount::umount2(target, nix::mount::MntFlags::MNT_DETACH)
    }
}

#[cfg(not(target_os = "linux"))]
impl Mounter for NixMounter {
    fn mount(&self, _spec: &MountSpec) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }

    fn unmount(&self, _target: &Path) -> Result<(), Errno> {
        Err(Errno::ENOSYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_from_config() {
        let config = MountConfig {
            enabled: true,
            source: PathBuf::from("/dev/loop3"),
            fstype: "ext4".to_string(),
            options: Some("noatime".to_string()),
        };
        let spec = MountSpec::from_config(&config, Path::new("/tmp/thrash"));
        assert_eq!(spec.source, PathBuf::from("/dev/loop3"));
        assert_eq!(spec.target, PathBuf::from("/tmp/thrash"));
        assert_eq!(spec.fstype, "ext4");
        assert_eq!(spec.options.as_deref(), Some("noatime"));
    }
}
