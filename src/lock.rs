//! File-based locking to serialize hook invocations.
//!
//! charon may run the updown hook for several connections at once. Each
//! invocation reads the filter table and then changes it, so concurrent runs
//! take an exclusive flock and wait for each other.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use tracing::debug;

use crate::cmd_abstraction::effective_uid;

/// A guard that holds an exclusive lock on the lock file.
/// The lock is automatically released when the guard is dropped.
pub struct LockGuard {
    _file: File,
}

impl LockGuard {
    /// Acquire an exclusive lock, blocking until other holders release it.
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let lock_path = path.as_ref();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).ok();
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("Failed to open lock file: {:?}", lock_path))?;

        // A lock file left behind by another user (usually root) can still be
        // locked, but only its owner may change the mode
        let owner = file
            .metadata()
            .with_context(|| format!("Failed to stat lock file: {:?}", lock_path))?
            .uid();
        if owner == effective_uid() {
            fs::set_permissions(lock_path, fs::Permissions::from_mode(0o600))
                .context("Failed to set lock file permissions")?;
        } else {
            debug!("Lock file {:?} is owned by uid {}, leaving its mode alone", lock_path, owner);
        }

        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {:?}", lock_path))?;
        debug!("Acquired lock {:?}", lock_path);

        Ok(Self { _file: file })
    }

    /// Try to acquire the lock without waiting.
    #[cfg(test)]
    pub(crate) fn try_acquire<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let lock_path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("Failed to open lock file: {:?}", lock_path))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(_) => Ok(None),
        }
    }
}

// Lock is automatically released when file is closed (on drop)
