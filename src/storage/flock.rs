//! # Advisory File Lock
//!
//! Inter-process mutual exclusion bound to a pathname. The lock is an
//! exclusive `flock` on an (empty) lock file: it is released when the guard
//! drops, and by the OS when the holding process exits, which is what makes
//! crashed readers recoverable without any registry of owners.
//!
//! Acquisition is non-blocking everywhere except the blocking-short commit
//! sections (meta rewrite, cursor rewrite), which use [`FileLock::acquire`].
//!
//! The guard never deletes the lock file: deleting a file that a peer may be
//! about to open would hand out locks on two different inodes for the same
//! path. Lock files are removed only by `Chunk::remove` (which owns the
//! chunk) and by GC (which re-acquires the lock first).

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use fs2::FileExt;

/// Exclusive advisory lock on a pathname. Held for the lifetime of the value.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Tries to take the lock without blocking. Returns `Ok(None)` when a
    /// peer holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<FileLock>> {
        let file = Self::open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(FileLock {
                file,
                path: path.to_path_buf(),
            })),
            Err(err) if is_contended(&err) => Ok(None),
            Err(err) => {
                Err(err).wrap_err_with(|| format!("failed to lock '{}'", path.display()))
            }
        }
    }

    /// Takes the lock, blocking until the current holder releases it. Only
    /// for blocking-short critical sections; everything else goes through
    /// [`FileLock::try_acquire`].
    pub fn acquire(path: &Path) -> Result<FileLock> {
        let file = Self::open_lock_file(path)?;
        file.lock_exclusive()
            .wrap_err_with(|| format!("failed to lock '{}'", path.display()))?;
        Ok(FileLock {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_lock_file(path: &Path) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open lock file '{}'", path.display()))
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_is_contended() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.lock");

        let held = FileLock::try_acquire(&path).unwrap();
        assert!(held.is_some());
        assert!(FileLock::try_acquire(&path).unwrap().is_none());
    }

    #[test]
    fn drop_releases_the_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.lock");

        let held = FileLock::try_acquire(&path).unwrap().unwrap();
        drop(held);
        assert!(FileLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn lock_file_survives_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.lock");

        drop(FileLock::try_acquire(&path).unwrap());
        assert!(path.exists());
    }
}
