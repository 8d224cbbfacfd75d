//! # Chunk
//!
//! One numbered immutable batch of records on disk, plus the sidecar files
//! that coordinate multi-process consumption of it:
//!
//! ```text
//! {id}.chunk         immutable journal payload (0644, appears via rename)
//! {id}.status        persistent read cursor
//! {id}.status.lock   cursor-commit lock
//! {id}.lock          ownership lock, held while a reader drains the chunk
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//! (absent) ── create ──▶ on disk, unloaded
//! unloaded ── load, lock won ──▶ draining (this process owns it)
//! unloaded ── load, read-only ──▶ reading (no lock taken)
//! draining ── drained + commit ──▶ removed
//! draining ── process dies ──▶ unloaded (lock released by the OS)
//! ```
//!
//! Creation stages the payload in `{id}.tmp.{pid}.{unix_time}.{uid}` and
//! renames it into place, so a chunk that can be opened is always complete.
//! An abandoned staging file (writer died) is reaped by GC once it is older
//! than the expiry in its own name.
//!
//! Removal order is load-bearing: the payload goes first and the ownership
//! lock last, so a racing loader that manages to grab a fresh lock file will
//! find the payload already gone and report "not loaded" instead of
//! re-reading delivered records.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use eyre::{ensure, eyre, Result, WrapErr};

use crate::config::{CHUNK_SUFFIX, LOCK_SUFFIX, STATUS_SUFFIX, TMP_MARKER};
use crate::storage::{unix_time_secs, FileLock, Journal, JournalCursor};

/// Distinguishes staging files created in the same process and second.
static TMP_UID: AtomicU64 = AtomicU64::new(0);

pub struct Chunk {
    dir: PathBuf,
    id: u64,
    read_only: bool,
    // Declaration order doubles as drop order: the cursor's files close
    // before the ownership lock is released.
    cursor: Option<JournalCursor>,
    lock: Option<FileLock>,
}

impl Chunk {
    pub fn new(dir: &Path, id: u64, read_only: bool) -> Chunk {
        Chunk {
            dir: dir.to_path_buf(),
            id,
            read_only,
            cursor: None,
            lock: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn chunk_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}", self.id, CHUNK_SUFFIX))
    }

    fn status_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}", self.id, STATUS_SUFFIX))
    }

    fn status_lock_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}.{}.{}", self.id, STATUS_SUFFIX, LOCK_SUFFIX))
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}", self.id, LOCK_SUFFIX))
    }

    /// Materializes the chunk from `records`: stages a world-readable
    /// journal file and renames it to `{id}.chunk`. The chunk is left
    /// unloaded; winning it is a separate [`Chunk::load`].
    pub fn create(&mut self, records: &[impl AsRef<[u8]>]) -> Result<()> {
        ensure!(
            self.cursor.is_none() && self.lock.is_none(),
            "chunk {} is already loaded",
            self.id
        );
        let chunk = self.chunk_path();
        ensure!(
            !chunk.exists(),
            "chunk file '{}' already exists",
            chunk.display()
        );

        let tmp = self.dir.join(format!(
            "{}.{}.{}.{}.{}",
            self.id,
            TMP_MARKER,
            std::process::id(),
            unix_time_secs(),
            TMP_UID.fetch_add(1, Ordering::Relaxed),
        ));
        Journal::write_new(&tmp, records)?;
        fs::rename(&tmp, &chunk).wrap_err_with(|| {
            format!(
                "failed to publish chunk '{}' from '{}'",
                chunk.display(),
                tmp.display()
            )
        })?;
        // Make the rename durable before anyone relies on enumeration.
        fs::File::open(&self.dir)
            .and_then(|dir| dir.sync_all())
            .wrap_err_with(|| format!("failed to sync spool directory '{}'", self.dir.display()))?;
        Ok(())
    }

    /// Attempts to take ownership of the chunk and open its cursor.
    /// Idempotent. Returns `false` without side effect when the payload does
    /// not exist or a peer holds the ownership lock. In read-only mode no
    /// lock is attempted and the cursor never persists progress.
    pub fn load(&mut self) -> Result<bool> {
        if self.cursor.is_some() {
            return Ok(true);
        }
        let chunk = self.chunk_path();
        if !chunk.exists() {
            return Ok(false);
        }
        if !self.read_only {
            match FileLock::try_acquire(&self.lock_path())? {
                Some(guard) => self.lock = Some(guard),
                None => return Ok(false),
            }
        }
        let cursor = if self.read_only {
            JournalCursor::open_ro(&chunk, &self.status_path())
        } else {
            JournalCursor::open(&chunk, &self.status_path())
        };
        match cursor {
            Ok(cursor) => {
                self.cursor = Some(cursor);
                Ok(true)
            }
            Err(err) => {
                self.lock = None;
                if chunk.exists() {
                    Err(err)
                } else {
                    // Lost the race against a peer's remove; the chunk was
                    // fully consumed and is gone.
                    Ok(false)
                }
            }
        }
    }

    /// Reads up to `n` records from the cursor; `None` means the chunk is
    /// drained.
    pub fn read_chunk(&mut self, n: usize) -> Result<Option<Vec<Vec<u8>>>> {
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| eyre!("chunk {} is not loaded", self.id))?;
        cursor.read_chunk(n)
    }

    /// Reads a single record; `None` means the chunk is drained.
    pub fn read(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self
            .read_chunk(1)?
            .and_then(|mut records| (!records.is_empty()).then(|| records.remove(0))))
    }

    /// Persists the cursor position.
    pub fn commit(&mut self) -> Result<()> {
        ensure!(!self.read_only, "commit on a read-only chunk {}", self.id);
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| eyre!("chunk {} is not loaded", self.id))?;
        cursor.commit()
    }

    /// Unconsumed payload bytes in this chunk, loading lazily. A chunk that
    /// has been removed, or whose cursor cannot be opened, counts as 0.
    pub fn lag(&mut self) -> u64 {
        if self.cursor.is_none() && !self.load().unwrap_or(false) {
            return 0;
        }
        self.cursor.as_ref().map(|c| c.lag()).unwrap_or(0)
    }

    /// Removes orphan sidecars for a chunk whose payload is gone. A no-op
    /// while the payload exists or while a peer holds the ownership lock, so
    /// it cannot race a loader of a just-published chunk.
    pub fn cleanup(&mut self) -> Result<()> {
        if self.chunk_path().exists() {
            return Ok(());
        }
        match FileLock::try_acquire(&self.lock_path())? {
            Some(guard) => self.lock = Some(guard),
            None => return Ok(()),
        }
        tracing::debug!(id = self.id, "removing orphan chunk sidecars");
        self.remove()
    }

    /// Deletes the chunk and all sidecars: payload first, ownership lock
    /// last, not-found ignored.
    pub fn remove(&mut self) -> Result<()> {
        self.cursor = None;
        for path in [
            self.chunk_path(),
            self.status_path(),
            self.status_lock_path(),
            self.lock_path(),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err)
                        .wrap_err_with(|| format!("failed to remove '{}'", path.display()))
                }
            }
        }
        self.lock = None;
        Ok(())
    }
}

/// Parses `{id}.chunk`.
pub(crate) fn parse_chunk_file_name(name: &str) -> Option<u64> {
    name.strip_suffix(&format!(".{CHUNK_SUFFIX}"))?.parse().ok()
}

/// Parses `{id}.lock`, `{id}.status`, and `{id}.status.lock`.
pub(crate) fn parse_sidecar_file_name(name: &str) -> Option<u64> {
    let parts: Vec<&str> = name.split('.').collect();
    let id = parts.first()?.parse().ok()?;
    match &parts[1..] {
        [suffix] if *suffix == LOCK_SUFFIX || *suffix == STATUS_SUFFIX => Some(id),
        [a, b] if *a == STATUS_SUFFIX && *b == LOCK_SUFFIX => Some(id),
        _ => None,
    }
}

/// Parses `{id}.tmp.{pid}.{unix_time}.{uid}`, returning (id, unix_time).
pub(crate) fn parse_tmp_file_name(name: &str) -> Option<(u64, u64)> {
    let parts: Vec<&str> = name.split('.').collect();
    match &parts[..] {
        [id, marker, _pid, time, _uid] if *marker == TMP_MARKER => {
            Some((id.parse().ok()?, time.parse().ok()?))
        }
        _ => None,
    }
}
