//! # Spool Garbage Collection
//!
//! Crashed readers and refillers leave debris behind: ownership locks and
//! cursor files for chunks that were removed, and staging files whose writer
//! died before the rename. GC classifies every name in the spool directory:
//!
//! | Name | Action |
//! |---|---|
//! | `meta*`, `read_lock` | skip |
//! | `{id}.chunk` | skip: live payload, never removed by GC |
//! | `{id}.lock` / `{id}.status` / `{id}.status.lock` | [`Chunk::cleanup`] |
//! | `{id}.tmp.{pid}.{time}.{uid}` older than the expiry | delete |
//! | anything else | warn and delete |
//!
//! Sidecar cleanup is safe against racing loaders because `Chunk::cleanup`
//! only acts once the payload is gone *and* it holds the ownership lock; a
//! peer mid-load either holds that lock (cleanup skips) or is about to fail
//! its load because the payload is gone.
//!
//! Runs are rate-limited across processes through the `gc_timestamp` meta
//! key, advanced atomically under the meta lock. The first process to ever
//! consult the key initializes it to "now" and skips the run, so a herd of
//! fresh constructors on a new directory does not stampede the scan.

use std::fs;
use std::path::Path;

use eyre::{ensure, Result, WrapErr};

use crate::config::{META_FILE_NAME, META_KEY_GC_TIMESTAMP, REFILL_LOCK_FILE_NAME, TMP_EXPIRY_SECS};
use crate::spool::chunk::{
    parse_chunk_file_name, parse_sidecar_file_name, parse_tmp_file_name, Chunk,
};
use crate::spool::Spool;
use crate::storage::unix_time_secs;

impl Spool {
    /// Runs [`Spool::gc`] if the shared `gc_timestamp` is older than the
    /// configured period, advancing it atomically so concurrent processes
    /// elect a single runner. Invoked on every read-write construction.
    pub(crate) fn try_gc(&mut self) -> Result<()> {
        let now = unix_time_secs();
        let period = self.gc_period.as_secs();
        if let Some(cached) = self.gc_timestamp_cached {
            if now <= cached + period {
                return Ok(());
            }
        }
        let meta = self.meta.as_mut().expect("meta is open in read-write mode");
        let (stamp, elected) = meta.locked(|entries| {
            match entries.get(META_KEY_GC_TIMESTAMP).copied() {
                // First contact with this directory is a warm-up only.
                None => {
                    entries.insert(META_KEY_GC_TIMESTAMP.to_string(), now);
                    (now, false)
                }
                Some(ts) if now > ts + period => {
                    entries.insert(META_KEY_GC_TIMESTAMP.to_string(), now);
                    (now, true)
                }
                Some(ts) => (ts, false),
            }
        })?;
        self.gc_timestamp_cached = Some(stamp);
        if elected {
            self.gc()?;
        }
        Ok(())
    }

    /// Sweeps the spool directory once. Never removes a live chunk payload.
    pub fn gc(&mut self) -> Result<()> {
        ensure!(!self.read_only, "gc on a read-only spool");
        tracing::debug!(dir = %self.dir.display(), "sweeping spool directory");
        let now = unix_time_secs();
        let entries = fs::read_dir(&self.dir)
            .wrap_err_with(|| format!("failed to read spool directory '{}'", self.dir.display()))?;
        for entry in entries {
            let entry = entry.wrap_err("failed to read spool directory entry")?;
            let name_os = entry.file_name();
            let name = name_os.to_string_lossy();

            if name.starts_with(META_FILE_NAME) || name == REFILL_LOCK_FILE_NAME {
                continue;
            }
            if parse_chunk_file_name(&name).is_some() {
                continue;
            }
            if let Some(id) = parse_sidecar_file_name(&name) {
                Chunk::new(&self.dir, id, false).cleanup()?;
                continue;
            }
            if let Some((id, created)) = parse_tmp_file_name(&name) {
                if now.saturating_sub(created) > TMP_EXPIRY_SECS {
                    tracing::debug!(id, file = %name, "removing abandoned staging file");
                    remove_quiet(&entry.path());
                }
                continue;
            }
            tracing::warn!(file = %name, "removing unrecognized file from spool directory");
            remove_quiet(&entry.path());
        }
        Ok(())
    }
}

/// Files legitimately vanish mid-sweep (a peer committed); that is not an
/// error.
fn remove_quiet(path: &Path) {
    let _ = fs::remove_file(path);
}
