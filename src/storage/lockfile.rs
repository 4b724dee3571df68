//! Data directory lock
//!
//! One instance per data directory. A second instance fails at startup with
//! an error naming the holding PID.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const LOCK_FILE_NAME: &str = ".sentinel.lock";

/// PID lock file, removed on drop.
#[derive(Debug)]
pub struct ProcessLock {
    lock_path: PathBuf,
    owned: bool,
}

impl ProcessLock {
    /// Take the lock for `data_dir`, creating the directory if needed.
    ///
    /// A lock left by a process that is no longer running is replaced.
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let lock_path = data_dir.join(LOCK_FILE_NAME);
        if let Some(pid) = Self::live_holder(&lock_path) {
            bail!(
                "Another panel-sentinel instance (PID {pid}) is using {}.\n\
                 Stop it, or remove {} if it is not running.",
                data_dir.display(),
                lock_path.display()
            );
        }

        let pid = std::process::id();
        fs::write(&lock_path, format!("{pid}\n"))
            .with_context(|| format!("Failed to write lock file {}", lock_path.display()))?;
        tracing::debug!(pid, path = %lock_path.display(), "Acquired data directory lock");

        Ok(Self {
            lock_path,
            owned: true,
        })
    }

    /// PID recorded in an existing lock file, if that process is alive.
    fn live_holder(lock_path: &Path) -> Option<u32> {
        let contents = fs::read_to_string(lock_path).ok()?;
        let Ok(pid) = contents.trim().parse::<u32>() else {
            tracing::warn!(path = %lock_path.display(), "Ignoring unreadable lock file");
            return None;
        };
        if pid != std::process::id() && Self::is_sentinel_process(pid) {
            Some(pid)
        } else {
            tracing::info!(pid, "Replacing stale lock file");
            None
        }
    }

    #[cfg(unix)]
    fn is_sentinel_process(pid: u32) -> bool {
        fs::read_to_string(format!("/proc/{pid}/cmdline"))
            .map(|cmdline| cmdline.contains("panel-sentinel") || cmdline.contains("panel_sentinel"))
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    fn is_sentinel_process(_pid: u32) -> bool {
        true
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    pub fn release(&mut self) {
        if !self.owned {
            return;
        }
        match fs::remove_file(&self.lock_path) {
            Ok(()) => tracing::debug!(path = %self.lock_path.display(), "Released data directory lock"),
            Err(e) => tracing::warn!(error = %e, "Failed to remove lock file"),
        }
        self.owned = false;
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}
