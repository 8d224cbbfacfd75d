//! # Storage Module
//!
//! This module provides the on-disk primitives the spool layer is built on:
//! the record journal, the metadata key/value file, and the advisory file
//! lock. Everything above this module coordinates purely through these three
//! primitives plus atomic rename.
//!
//! ## Files and Their Owners
//!
//! ```text
//! spool_dir/
//! ├── {id}.chunk         # journal: immutable record payload
//! ├── {id}.status        # journal: persistent consumer cursor
//! ├── {id}.status.lock   # journal: cursor-commit lock
//! ├── {id}.lock          # flock: chunk ownership lock
//! ├── meta               # meta: id counter, gc timestamp
//! ├── meta.lock          # flock: meta-commit lock
//! └── read_lock          # flock: directory-wide refill lock
//! ```
//!
//! ## Atomicity Model
//!
//! - Journal payloads are written to a staging file, fsynced, and renamed
//!   into place; a reader that can open the final name sees a complete file.
//! - Source journals grow by appending framed records first and publishing
//!   them afterwards by rewriting the header counts; the header count is the
//!   commit point.
//! - The meta file is rewritten through a `meta.tmp` + rename under the
//!   `meta.lock` file lock.
//! - Cursor files are rewritten in place (a single header-sized write) under
//!   their `.lock` sidecar.
//!
//! ## Module Organization
//!
//! - `journal`: record log and persistent consumer cursor
//! - `meta`: small key/value map with locked read-modify-write commits
//! - `flock`: non-blocking advisory file lock

mod flock;
mod journal;
mod meta;

pub use flock::FileLock;
pub use journal::{Journal, JournalCursor, JOURNAL_HEADER_SIZE, RECORD_HEADER_SIZE};
pub use meta::Meta;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use eyre::{ensure, Result};
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Parses a zerocopy struct from a byte slice with size validation.
#[inline]
pub fn parse_zerocopy<'a, T: FromBytes + KnownLayout + Immutable>(
    bytes: &'a [u8],
    type_name: &str,
) -> Result<&'a T> {
    let size = std::mem::size_of::<T>();
    ensure!(
        bytes.len() >= size,
        "buffer too small for {}: {} < {}",
        type_name,
        bytes.len(),
        size
    );
    T::ref_from_bytes(&bytes[..size])
        .map_err(|e| eyre::eyre!("failed to parse {}: {:?}", type_name, e))
}

/// Builds a sibling path by appending a suffix to the full file name,
/// e.g. `sibling("7.status", ".lock")` → `7.status.lock`.
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Seconds since the unix epoch.
pub(crate) fn unix_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_appends_to_full_file_name() {
        let status = Path::new("/spool/7.status");
        assert_eq!(sibling(status, ".lock"), Path::new("/spool/7.status.lock"));
    }
}
