//! Safe wrappers for platform-specific unsafe operations.
//!
//! Every `unsafe` block in the codebase lives here. Call sites use the safe
//! public API and never touch `unsafe` directly.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

/// Try to take an exclusive advisory lock on `file` without blocking.
///
/// Returns `Ok(true)` when the lock was taken, `Ok(false)` when another open
/// file description already holds it, and `Err` for any other failure.
///
/// # Safety
/// `flock` only reads the descriptor; `file` keeps it open for the duration
/// of the call.
pub fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    // SAFETY: the descriptor is owned by `file`, which outlives this call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

/// Release an advisory lock taken with [`try_lock_exclusive`].
///
/// # Safety
/// `flock` only reads the descriptor; `file` keeps it open for the duration
/// of the call.
pub fn unlock(file: &File) -> io::Result<()> {
    // SAFETY: the descriptor is owned by `file`, which outlives this call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Set an environment variable.
///
/// # Safety
/// Caller must ensure no other threads are reading environment variables concurrently.
pub fn set_env(key: &str, value: &str) {
    // SAFETY: Caller must ensure no other threads are reading environment
    // variables concurrently.
    #[allow(unsafe_code)]
    unsafe {
        std::env::set_var(key, value);
    }
}

/// Remove an environment variable.
///
/// # Safety
/// Caller must ensure no other threads are reading environment variables concurrently.
pub fn remove_env(key: &str) {
    // SAFETY: Caller must ensure no other threads are reading environment
    // variables concurrently.
    #[allow(unsafe_code)]
    unsafe {
        std::env::remove_var(key);
    }
}
