//! File-based locking to serialize rule compiler runs.
//!
//! Uses flock-style advisory locking so two `make-rules` runs against the
//! same output directory cannot interleave their writes. The lock file sits
//! next to the directory, never inside it.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Extension of the lock file kept beside a locked directory.
pub const LOCK_EXTENSION: &str = "lock";

/// Lock file for `dir`: `.<name>.lock` in its parent, so the locked
/// directory itself holds only rule files.
pub fn lock_path(dir: &Path) -> PathBuf {
    match (dir.parent(), dir.file_name()) {
        (Some(parent), Some(name)) => {
            parent.join(format!(".{}.{}", name.to_string_lossy(), LOCK_EXTENSION))
        }
        _ => dir.join(format!(".make-rules.{}", LOCK_EXTENSION)),
    }
}

/// A guard that holds an exclusive lock on a directory's lock file.
/// The lock is released when the guard is dropped.
pub struct LockGuard {
    _file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Attempt to lock `dir`. The directory itself need not exist yet.
    /// Returns an error if another run already holds the lock.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let lock_path = lock_path(dir);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        // create+read+write without truncate: no race between create and lock
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

        fs::set_permissions(&lock_path, fs::Permissions::from_mode(0o600))
            .context("Failed to set lock file permissions")?;

        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Another make-rules run is using {}.\n\
                 If you believe this is an error, remove the lock file: {}",
                dir.display(),
                lock_path.display()
            )
        })?;

        Ok(Self {
            _file: file,
            path: lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
