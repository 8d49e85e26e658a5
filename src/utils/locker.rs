//! File-based locking to prevent overlapping backup runs
//!
//! Cron-style triggering can start a new run while the previous one is still
//! dumping; the lock lives next to the artifacts so two processes sharing a
//! destination root exclude each other.

use anyhow::{Context, Result};
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Lock guard held for the duration of a run
pub struct RunLock {
    // Lock and guard stored together; see acquire() for the safety argument
    _lock: Box<(RwLock<File>, Option<fd_lock::RwLockWriteGuard<'static, File>>)>,
    lock_path: PathBuf,
}

impl RunLock {
    /// Acquire the exclusive run lock under `destination_root`.
    /// Fails if another run against the same root is in progress.
    pub fn acquire(destination_root: &Path) -> Result<Self> {
        let lock_path = destination_root.join(".dump-manager.lock");

        debug!("Attempting to acquire run lock: {:?}", lock_path);

        std::fs::create_dir_all(destination_root)
            .context("Failed to create destination root for lock file")?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .context(format!("Failed to open lock file: {:?}", lock_path))?;

        let mut boxed_lock = Box::new((RwLock::new(file), None));

        // SAFETY: self-referential pair. The guard borrows the RwLock stored
        // in the same Box; the Box never moves after creation and tuple drop
        // order releases the guard before the lock.
        let lock_ptr = &mut boxed_lock.0 as *mut RwLock<File>;
        let guard = unsafe { (*lock_ptr).try_write() }.context(
            "Another backup run is already in progress against this destination (lock held)",
        )?;
        let static_guard: fd_lock::RwLockWriteGuard<'static, File> =
            unsafe { std::mem::transmute(guard) };
        boxed_lock.1 = Some(static_guard);

        info!("Acquired run lock: {:?}", lock_path);

        Ok(Self {
            _lock: boxed_lock,
            lock_path,
        })
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        debug!("Released run lock: {:?}", self.lock_path);

        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            debug!("Failed to remove lock file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_excludes_second_run() {
        let root = TempDir::new().unwrap();

        let lock = RunLock::acquire(root.path()).expect("Failed to acquire lock");
        assert!(lock.path().exists());

        assert!(RunLock::acquire(root.path()).is_err());

        drop(lock);

        let lock2 = RunLock::acquire(root.path()).expect("Failed to acquire lock after release");
        drop(lock2);
    }
}
