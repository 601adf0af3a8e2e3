//! Advisory exclusive file locks used to serialize server startup across
//! independent `bd` processes.
//!
//! Only an active hold on the lock file means contention. The file itself may
//! linger after its holder exits and is never treated as a signal.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Held advisory lock. Released when dropped.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Failed to unlock {:?}: {}", self.path, e);
        } else {
            debug!("Released advisory lock on {:?}", self.path);
        }
    }
}

/// Outcome of a non-blocking acquire.
#[derive(Debug)]
pub enum TryLock {
    Acquired(LockGuard),
    /// Another process holds the lock.
    Contended,
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    Ok(options.open(path)?)
}

fn stamp_owner(file: &mut File) {
    // Owner PID is diagnostic only
    let _ = file.set_len(0);
    let _ = writeln!(file, "{}", std::process::id());
}

/// Take the lock without blocking.
pub fn try_acquire(path: &Path) -> Result<TryLock> {
    let mut file = open_lock_file(path)?;
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            stamp_owner(&mut file);
            debug!("Acquired advisory lock on {:?}", path);
            Ok(TryLock::Acquired(LockGuard {
                file,
                path: path.to_path_buf(),
            }))
        }
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
            debug!("Lock {:?} is held by another process", path);
            Ok(TryLock::Contended)
        }
        Err(e) => Err(Error::Io(e)),
    }
}

/// Block until the lock is acquired or `timeout` elapses.
pub async fn acquire(path: &Path, timeout: Duration) -> Result<LockGuard> {
    let owned = path.to_path_buf();

    // lock_exclusive blocks the OS thread. If the timeout fires first the
    // abandoned task drops its guard, releasing the lock as soon as it gets it.
    let task = tokio::task::spawn_blocking(move || -> Result<LockGuard> {
        let mut file = open_lock_file(&owned)?;
        FileExt::lock_exclusive(&file)?;
        stamp_owner(&mut file);
        Ok(LockGuard { file, path: owned })
    });

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => {
            let guard = result?;
            debug!("Acquired advisory lock on {:?} after waiting", guard.path);
            Ok(guard)
        }
        Ok(Err(join)) => Err(Error::Process(format!(
            "lock wait for {} panicked: {}",
            path.display(),
            join
        ))),
        Err(_) => Err(Error::LockContention(path.to_path_buf())),
    }
}

/// Whether some process currently holds the lock.
///
/// Probes with a non-blocking acquire that is released immediately, so a
/// free lock stays free and a held lock is never disturbed.
pub fn is_held(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    let Ok(file) = OpenOptions::new().read(true).write(true).open(path) else {
        return false;
    };
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            false
        }
        Err(_) => true,
    }
}
