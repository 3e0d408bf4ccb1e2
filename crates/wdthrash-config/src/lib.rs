//! # wdthrash-config
//!
//! Run parameters for the wdthrash harness.
//!
//! Loads configuration from:
//! 1. `~/.wdthrash/config.toml` (global)
//! 2. An explicit file handed in by the caller (overrides global)
//! 3. `WDTHRASH_*` environment variables
//! 4. Caller overrides such as CLI flags (highest priority)
//!
//! Every source is a [`ConfigLayer`] of optional values. [`Config::resolve`]
//! fills in the defaults, validates, and produces the immutable [`Config`].

pub mod logging;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Working directory used when none is configured.
pub const DEFAULT_WORKING_DIR: &str = "/tmp/inotify_syscall_thrash";

/// Filesystem type mounted over the working directory by the mount churner.
pub const DEFAULT_FSTYPE: &str = "tmpfs";

/// Worker thread stack size. Workers keep almost nothing on the stack.
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

const MIN_STACK_SIZE: usize = 16 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("{field}: cannot parse {value:?} as a count")]
    Unparsable { field: &'static str, value: String },
    #[error("{field}: count must not be negative (got {value})")]
    Negative { field: &'static str, value: i64 },
    #[error("{field}: must be at least 1")]
    Zero { field: &'static str },
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Parse a numeric count. Sign is preserved so that [`Config::resolve`]
/// can reject negative values with a precise error.
pub fn parse_count(field: &'static str, value: &str) -> Result<i64, ConfigError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| ConfigError::Unparsable {
            field,
            value: value.to_string(),
        })
}

// ============================================================================
// Layers
// ============================================================================

/// One source of configuration. `None` means "not set here".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    pub threads: ThreadsLayer,
    pub run: RunLayer,
    pub mount: MountLayer,
    pub timing: TimingLayer,
}

/// Thread counts. A value of 0 selects the default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadsLayer {
    /// Load heuristic; only used to derive other defaults
    pub cores: Option<i64>,
    /// Watch adders per backing file (watcherThreads)
    pub adders: Option<i64>,
    /// Range closers per instance
    pub removers: Option<i64>,
    /// Near-low closers per instance
    pub low_removers: Option<i64>,
    /// Adders per backing file multiplier
    pub multiplier: Option<i64>,
    /// Event drainers per instance
    pub data_dumpers: Option<i64>,
    /// File churner threads
    pub file_churners: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunLayer {
    pub instances: Option<i64>,
    pub working_dir: Option<PathBuf>,
    pub rendezvous: Option<bool>,
    pub stack_size_kib: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountLayer {
    pub enabled: Option<bool>,
    pub source: Option<PathBuf>,
    pub fstype: Option<String>,
    pub options: Option<String>,
}

/// Intervals, all in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingLayer {
    pub file_churn_interval_ms: Option<u64>,
    pub bounds_reset_interval_ms: Option<u64>,
    pub mount_hold_ms: Option<u64>,
    pub mount_settle_ms: Option<u64>,
    pub drain_timeout_ms: Option<u64>,
    pub join_grace_ms: Option<u64>,
    pub rendezvous_timeout_ms: Option<u64>,
}

fn overlay<T>(base: &mut Option<T>, top: Option<T>) {
    if top.is_some() {
        *base = top;
    }
}

impl ConfigLayer {
    /// Load the global file, then `explicit` (if any), then the environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut layer = ConfigLayer::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                layer.merge(Self::from_file(&global_path)?);
            }
        }

        if let Some(path) = explicit {
            debug!("Loading config from {:?}", path);
            layer.merge(Self::from_file(path)?);
        }

        layer.merge(Self::from_env()?);
        Ok(layer)
    }

    /// Global config path: ~/.wdthrash/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".wdthrash/config.toml"))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Build a layer from `WDTHRASH_*` variables using `lookup` as the
    /// environment.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let count = |key: &str, field: &'static str| -> Result<Option<i64>, ConfigError> {
            lookup(key).map(|v| parse_count(field, &v)).transpose()
        };
        let millis = |key: &str, field: &'static str| -> Result<Option<u64>, ConfigError> {
            lookup(key)
                .map(|v| match v.trim().parse::<u64>() {
                    Ok(ms) => Ok(ms),
                    Err(_) => Err(ConfigError::Unparsable { field, value: v }),
                })
                .transpose()
        };

        let mut layer = ConfigLayer::default();
        layer.threads.cores = count("WDTHRASH_CORES", "cores")?;
        layer.threads.adders = count("WDTHRASH_ADDERS", "adders")?;
        layer.threads.removers = count("WDTHRASH_REMOVERS", "removers")?;
        layer.threads.low_removers = count("WDTHRASH_LOW_REMOVERS", "low_removers")?;
        layer.threads.multiplier = count("WDTHRASH_MULTIPLIER", "multiplier")?;
        layer.threads.data_dumpers = count("WDTHRASH_DATA_DUMPERS", "data_dumpers")?;
        layer.threads.file_churners = count("WDTHRASH_FILE_CHURNERS", "file_churners")?;
        layer.run.instances = count("WDTHRASH_INSTANCES", "instances")?;
        layer.run.working_dir = lookup("WDTHRASH_DIR").map(PathBuf::from);
        layer.mount.source = lookup("WDTHRASH_SOURCE_MNT").map(PathBuf::from);
        layer.mount.fstype = lookup("WDTHRASH_FSTYPE");
        layer.mount.options = lookup("WDTHRASH_MOUNT_OPTIONS");
        if let Some(v) = lookup("WDTHRASH_NO_MOUNT") {
            layer.mount.enabled = Some(!matches!(v.trim(), "1" | "true" | "yes"));
        }
        layer.timing.join_grace_ms = millis("WDTHRASH_JOIN_GRACE_MS", "join_grace_ms")?;
        Ok(layer)
    }

    /// Overlay `other` on top of `self`, field by field.
    pub fn merge(&mut self, other: ConfigLayer) {
        let (t, o) = (&mut self.threads, other.threads);
        overlay(&mut t.cores, o.cores);
        overlay(&mut t.adders, o.adders);
        overlay(&mut t.removers, o.removers);
        overlay(&mut t.low_removers, o.low_removers);
        overlay(&mut t.multiplier, o.multiplier);
        overlay(&mut t.data_dumpers, o.data_dumpers);
        overlay(&mut t.file_churners, o.file_churners);

        let (r, o) = (&mut self.run, other.run);
        overlay(&mut r.instances, o.instances);
        overlay(&mut r.working_dir, o.working_dir);
        overlay(&mut r.rendezvous, o.rendezvous);
        overlay(&mut r.stack_size_kib, o.stack_size_kib);

        let (m, o) = (&mut self.mount, other.mount);
        overlay(&mut m.enabled, o.enabled);
        overlay(&mut m.source, o.source);
        overlay(&mut m.fstype, o.fstype);
        overlay(&mut m.options, o.options);

        let (tm, o) = (&mut self.timing, other.timing);
        overlay(&mut tm.file_churn_interval_ms, o.file_churn_interval_ms);
        overlay(&mut tm.bounds_reset_interval_ms, o.bounds_reset_interval_ms);
        overlay(&mut tm.mount_hold_ms, o.mount_hold_ms);
        overlay(&mut tm.mount_settle_ms, o.mount_settle_ms);
        overlay(&mut tm.drain_timeout_ms, o.drain_timeout_ms);
        overlay(&mut tm.join_grace_ms, o.join_grace_ms);
        overlay(&mut tm.rendezvous_timeout_ms, o.rendezvous_timeout_ms);
    }
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Fully resolved run parameters. Immutable once handed to the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub cores: usize,
    pub watcher_threads: usize,
    pub closer_threads: usize,
    pub near_low_closer_threads: usize,
    pub watcher_multiplier: usize,
    pub data_dumper_threads: usize,
    pub file_churner_threads: usize,
    pub instance_count: usize,
    pub working_dir: PathBuf,
    pub mount: MountConfig,
    /// Wait for each spawned worker to enter its loop before spawning the next
    pub rendezvous: bool,
    pub stack_size: usize,
    pub timing: Timing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    pub enabled: bool,
    pub source: PathBuf,
    pub fstype: String,
    pub options: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    pub file_churn_interval: Duration,
    pub bounds_reset_interval: Duration,
    pub mount_hold: Duration,
    pub mount_settle: Duration,
    pub drain_timeout: Duration,
    pub join_grace: Duration,
    pub rendezvous_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            file_churn_interval: Duration::from_secs(2),
            bounds_reset_interval: Duration::from_secs(1),
            mount_hold: Duration::from_millis(100),
            mount_settle: Duration::from_millis(100),
            drain_timeout: Duration::from_millis(50),
            join_grace: Duration::from_secs(30),
            rendezvous_timeout: Duration::from_secs(2),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults(num_cpus::get())
    }
}

fn count(field: &'static str, value: Option<i64>) -> Result<Option<usize>, ConfigError> {
    match value {
        None | Some(0) => Ok(None),
        Some(n) if n < 0 => Err(ConfigError::Negative { field, value: n }),
        Some(n) => usize::try_from(n).map(Some).map_err(|_| ConfigError::Invalid {
            field,
            reason: format!("{} is out of range", n),
        }),
    }
}

impl Config {
    /// Defaults for a machine with `cores` online CPUs. One extra core is
    /// assumed so the derived counts never drop to zero.
    pub fn defaults(cores: usize) -> Self {
        let cores = cores.max(1) + 1;
        let working_dir = PathBuf::from(DEFAULT_WORKING_DIR);
        Self {
            cores,
            watcher_threads: 3,
            closer_threads: 3,
            near_low_closer_threads: 1,
            watcher_multiplier: 2,
            data_dumper_threads: 1,
            file_churner_threads: (cores / 2).max(1),
            instance_count: (cores / 2).max(1),
            mount: MountConfig {
                enabled: true,
                source: working_dir.clone(),
                fstype: DEFAULT_FSTYPE.to_string(),
                options: None,
            },
            working_dir,
            rendezvous: true,
            stack_size: DEFAULT_STACK_SIZE,
            timing: Timing::default(),
        }
    }

    /// Apply defaults to `layer` and validate the result.
    pub fn resolve(layer: &ConfigLayer) -> Result<Self, ConfigError> {
        let t = &layer.threads;
        let cores = count("cores", t.cores)?.unwrap_or_else(num_cpus::get);
        let mut config = Config::defaults(cores);

        if let Some(n) = count("adders", t.adders)? {
            config.watcher_threads = n;
        }
        config.closer_threads = count("removers", t.removers)?.unwrap_or(config.watcher_threads);
        if let Some(n) = count("low_removers", t.low_removers)? {
            config.near_low_closer_threads = n;
        }
        if let Some(n) = count("multiplier", t.multiplier)? {
            config.watcher_multiplier = n;
        }
        if let Some(n) = count("data_dumpers", t.data_dumpers)? {
            config.data_dumper_threads = n;
        }
        if let Some(n) = count("file_churners", t.file_churners)? {
            config.file_churner_threads = n;
        }
        if let Some(n) = count("instances", layer.run.instances)? {
            config.instance_count = n;
        }
        if let Some(kib) = count("stack_size_kib", layer.run.stack_size_kib)? {
            config.stack_size = kib.saturating_mul(1024);
        }
        if let Some(rendezvous) = layer.run.rendezvous {
            config.rendezvous = rendezvous;
        }

        if let Some(dir) = &layer.run.working_dir {
            config.working_dir = dir.clone();
        }
        config.mount.source = layer
            .mount
            .source
            .clone()
            .unwrap_or_else(|| config.working_dir.clone());
        if let Some(fstype) = &layer.mount.fstype {
            config.mount.fstype = fstype.clone();
        }
        if let Some(enabled) = layer.mount.enabled {
            config.mount.enabled = enabled;
        }
        config.mount.options = layer.mount.options.clone();

        let tm = &layer.timing;
        let timing = &mut config.timing;
        let ms = Duration::from_millis;
        if let Some(v) = tm.file_churn_interval_ms {
            timing.file_churn_interval = ms(v);
        }
        if let Some(v) = tm.bounds_reset_interval_ms {
            timing.bounds_reset_interval = ms(v);
        }
        if let Some(v) = tm.mount_hold_ms {
            timing.mount_hold = ms(v);
        }
        if let Some(v) = tm.mount_settle_ms {
            timing.mount_settle = ms(v);
        }
        if let Some(v) = tm.drain_timeout_ms {
            timing.drain_timeout = ms(v);
        }
        if let Some(v) = tm.join_grace_ms {
            timing.join_grace = ms(v);
        }
        if let Some(v) = tm.rendezvous_timeout_ms {
            timing.rendezvous_timeout = ms(v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the harness relies on. Run again by the harness
    /// so hand-built configs get the same treatment as resolved ones.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("adders", self.watcher_threads),
            ("removers", self.closer_threads),
            ("low_removers", self.near_low_closer_threads),
            ("multiplier", self.watcher_multiplier),
            ("data_dumpers", self.data_dumper_threads),
            ("file_churners", self.file_churner_threads),
            ("instances", self.instance_count),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }

        // The worker count helpers below rely on this
        if self.checked_total_workers().is_none() {
            return Err(ConfigError::Invalid {
                field: "threads",
                reason: "worker count overflows".to_string(),
            });
        }

        if self.working_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "working_dir",
                reason: "path is empty".to_string(),
            });
        }
        if self.mount.enabled && self.mount.fstype.is_empty() {
            return Err(ConfigError::Invalid {
                field: "fstype",
                reason: "filesystem type is empty".to_string(),
            });
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::Invalid {
                field: "stack_size",
                reason: format!("{} bytes is below {}", self.stack_size, MIN_STACK_SIZE),
            });
        }

        let timings = [
            ("file_churn_interval", self.timing.file_churn_interval),
            ("bounds_reset_interval", self.timing.bounds_reset_interval),
            ("mount_hold", self.timing.mount_hold),
            ("mount_settle", self.timing.mount_settle),
            ("drain_timeout", self.timing.drain_timeout),
            ("join_grace", self.timing.join_grace),
            ("rendezvous_timeout", self.timing.rendezvous_timeout),
        ];
        for (field, value) in timings {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "duration must be non-zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Adders per instance: one group of `watcher_multiplier` per backing file.
    pub fn adders_per_instance(&self) -> usize {
        self.watcher_threads * self.watcher_multiplier
    }

    pub fn workers_per_instance(&self) -> usize {
        self.adders_per_instance()
            + self.closer_threads
            + self.near_low_closer_threads
            + self.data_dumper_threads
    }

    /// Every worker a run spawns, per-instance and process-wide.
    pub fn total_workers(&self) -> usize {
        self.workers_per_instance() * self.instance_count
            + self.file_churner_threads
            + 1
            + usize::from(self.mount.enabled)
    }

    fn checked_total_workers(&self) -> Option<usize> {
        let per_instance = self
            .watcher_threads
            .checked_mul(self.watcher_multiplier)?
            .checked_add(self.closer_threads)?
            .checked_add(self.near_low_closer_threads)?
            .checked_add(self.data_dumper_threads)?;
        per_instance
            .checked_mul(self.instance_count)?
            .checked_add(self.file_churner_threads)?
            .checked_add(1 + usize::from(self.mount.enabled))
    }
}
