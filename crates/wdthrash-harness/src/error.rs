use std::path::PathBuf;

use thiserror::Error;
use wdthrash_config::ConfigError;

use crate::subsystem::SubsystemError;

/// Fatal startup failures. Steady-state failures never surface here.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("cannot create working directory {}: {source}", path.display())]
    WorkingDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open subsystem instance {index}: {source}")]
    OpenInstance {
        index: usize,
        #[source]
        source: SubsystemError,
    },

    #[error("cannot spawn worker {worker}: {source}")]
    Spawn {
        worker: String,
        #[source]
        source: std::io::Error,
    },
}

/// How a failed subsystem call is treated inside a worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Produced by the intended concurrency; counted, logged at debug at most
    ExpectedRace,
    /// Anything else; counted and logged at warn. This is the harness output.
    Unexpected,
}
