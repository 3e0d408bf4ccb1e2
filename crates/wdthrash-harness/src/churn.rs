//! Backing files that adders watch and file churners delete and recreate.

use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use wdthrash_config::log_churn_warn;

/// `{working_dir}/0 .. {working_dir}/{count-1}`
#[derive(Debug, Clone)]
pub struct FileChurnSet {
    paths: Vec<PathBuf>,
}

/// Result of one pass over the set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChurnOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

impl FileChurnSet {
    pub fn new(dir: &Path, count: usize) -> Self {
        let paths = (0..count).map(|i| dir.join(i.to_string())).collect();
        Self { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Backing file for adder group `file_num`, wrapping around the set.
    pub fn path(&self, file_num: usize) -> &Path {
        &self.paths[file_num % self.paths.len()]
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Delete (if present) then recreate every file, empty.
    pub fn churn(&self) -> ChurnOutcome {
        let mut outcome = ChurnOutcome::default();
        for path in &self.paths {
            match recreate(path) {
                Ok(()) => outcome.succeeded += 1,
                Err(e) => {
                    outcome.failed += 1;
                    log_churn_warn!("Failed to recreate backing file", path = %path.display(), error = %e);
                }
            }
        }
        outcome
    }

    /// Delete every file once. Missing files are not failures.
    pub fn remove_all(&self) -> ChurnOutcome {
        let mut outcome = ChurnOutcome::default();
        for path in &self.paths {
            match remove_if_present(path) {
                Ok(()) => outcome.succeeded += 1,
                Err(e) => {
                    outcome.failed += 1;
                    log_churn_warn!("Failed to remove backing file", path = %path.display(), error = %e);
                }
            }
        }
        outcome
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn recreate(path: &Path) -> io::Result<()> {
    remove_if_present(path)?;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map(drop)
}
