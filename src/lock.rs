//! Single-instance run lock.
//!
//! A pipeline run holds an exclusive, non-blocking advisory lock on a fixed
//! file for its whole duration. A second invocation that finds the lock held
//! gets [`CallSentryError::AlreadyLocked`] immediately and must exit.

use crate::error::{CallSentryError, Result};
use crate::sys;
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Attempts made when a concurrent release unlinks the file between our
/// `open` and `flock`.
const ACQUIRE_ATTEMPTS: usize = 3;

/// Held run lock. Released on [`RunLock::release`] or on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: Option<File>,
}

impl RunLock {
    /// Acquire the lock at `path` without waiting.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| CallSentryError::Lock {
                message: format!("Failed to create lock directory {}: {e}", parent.display()),
            })?;
        }

        for _ in 0..ACQUIRE_ATTEMPTS {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .map_err(|e| CallSentryError::Lock {
                    message: format!("Failed to open lock file {}: {e}", path.display()),
                })?;

            let locked = sys::try_lock_exclusive(&file).map_err(|e| CallSentryError::Lock {
                message: format!("flock failed on {}: {e}", path.display()),
            })?;
            if !locked {
                return Err(CallSentryError::AlreadyLocked {
                    path: path.display().to_string(),
                });
            }

            // The previous holder may have unlinked the file after we opened
            // it; a lock on an orphaned inode excludes nobody.
            if !still_linked(&file, path) {
                debug!(path = %path.display(), "lock file was replaced, retrying");
                continue;
            }

            let mut lock = Self {
                path: path.to_path_buf(),
                file: Some(file),
            };
            lock.write_owner();
            debug!(path = %path.display(), "run lock acquired");
            return Ok(lock);
        }

        Err(CallSentryError::Lock {
            message: format!("Lock file {} kept changing under us", path.display()),
        })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock and remove the lock file. Safe to call more than once.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        // Unlink while still holding the lock so a waiter cannot lock the
        // inode we are about to abandon.
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), "failed to remove lock file: {e}");
        }
        if let Err(e) = sys::unlock(&file) {
            warn!(path = %self.path.display(), "failed to unlock: {e}");
        }
        debug!(path = %self.path.display(), "run lock released");
    }

    /// Record pid and acquisition time for operators inspecting a stuck lock.
    fn write_owner(&mut self) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let body = format!(
            "pid={} acquired_at={}\n",
            std::process::id(),
            Utc::now().to_rfc3339()
        );
        let result = file
            .set_len(0)
            .and_then(|()| file.write_all(body.as_bytes()));
        if let Err(e) = result {
            warn!(path = %self.path.display(), "failed to write lock owner: {e}");
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Report whether the lock is currently held by someone, without taking it.
pub fn is_locked(path: &Path) -> Result<bool> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let acquired = sys::try_lock_exclusive(&file)?;
    if acquired {
        sys::unlock(&file)?;
    }
    Ok(!acquired)
}

fn still_linked(file: &File, path: &Path) -> bool {
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(on_disk)) => held.dev() == on_disk.dev() && held.ino() == on_disk.ino(),
        _ => false,
    }
}
