//! Test environment abstraction for isolated runs.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated working directory under a temp root
//! - A small, fast, mount-free `Config` pointing at it
//!
//! # Usage
//!
//! ```ignore
//! use wdthrash_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let config = env.config();
//!     // config.working_dir does not exist yet; the harness creates it
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use crate::{Config, MountConfig, Timing, DEFAULT_FSTYPE, DEFAULT_STACK_SIZE};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with a unique working directory
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Root of the temp tree; always exists
    pub root: PathBuf,
    /// Working directory handed to the harness; created by the harness
    pub working_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().to_path_buf();
        let working_dir = root.join(format!("thrash-{}", test_id));

        Ok(Self {
            _temp_dir: temp_dir,
            root,
            working_dir,
            test_id,
        })
    }

    /// A small run: one instance, mount churn off, short intervals.
    pub fn config(&self) -> Config {
        Config {
            cores: 2,
            watcher_threads: 2,
            closer_threads: 2,
            near_low_closer_threads: 1,
            watcher_multiplier: 2,
            data_dumper_threads: 1,
            file_churner_threads: 1,
            instance_count: 1,
            working_dir: self.working_dir.clone(),
            mount: MountConfig {
                enabled: false,
                source: self.working_dir.clone(),
                fstype: DEFAULT_FSTYPE.to_string(),
                options: None,
            },
            rendezvous: true,
            stack_size: DEFAULT_STACK_SIZE,
            timing: Timing {
                file_churn_interval: Duration::from_millis(20),
                bounds_reset_interval: Duration::from_millis(50),
                mount_hold: Duration::from_millis(10),
                mount_settle: Duration::from_millis(10),
                drain_timeout: Duration::from_millis(5),
                join_grace: Duration::from_secs(10),
                rendezvous_timeout: Duration::from_secs(1),
            },
        }
    }

    /// Write a config file under the temp root and return its path
    pub fn write_config_file(&self, contents: &str) -> anyhow::Result<PathBuf> {
        let path = self.root.join("config.toml");
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}
