//! # Spool Metadata File
//!
//! Small persistent key → u64 map holding the chunk id counter and the GC
//! timestamp. Commits are optimistic in the sense that a handle's pending
//! writes are overlaid onto a fresh read of the file under the `meta.lock`
//! file lock, so concurrent processes can update disjoint keys without
//! clobbering each other.
//!
//! For read-modify-write sequences that must be atomic across processes
//! (allocating the next chunk id, advancing the GC timestamp), [`Meta::locked`]
//! runs a closure against freshly loaded state while the file lock is held
//! and persists the result before releasing it.
//!
//! ## File Format
//!
//! ```text
//! +------------------+----------------------------------+----
//! | Meta Header      | key_len u16 | key bytes | value u64 | ...
//! | (24 bytes)       |                                  |
//! +------------------+----------------------------------+----
//! ```
//!
//! The file is rewritten through `meta.tmp` + rename; the GC classifier
//! skips every name starting with "meta", which covers the live file, its
//! lock, and the transient staging file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{CURRENT_VERSION, META_MAGIC};
use crate::storage::{parse_zerocopy, sibling, FileLock};

pub const META_HEADER_SIZE: usize = 24;

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
struct MetaHeader {
    magic: [u8; 16],
    version: U32,
    count: U32,
}

impl MetaHeader {
    fn new(count: u32) -> Self {
        Self {
            magic: *META_MAGIC,
            version: U32::new(CURRENT_VERSION),
            count: U32::new(count),
        }
    }

    le_fields! {
        version: u32,
        count: u32,
    }
}

/// Persistent key/value metadata for one spool directory.
#[derive(Debug)]
pub struct Meta {
    path: PathBuf,
    entries: HashMap<String, u64>,
    dirty: HashMap<String, u64>,
}

impl Meta {
    /// Opens the metadata file, loading current entries if it exists. The
    /// file itself is created by the first commit.
    pub fn open(path: &Path) -> Result<Meta> {
        let entries = load_entries(path)?;
        Ok(Meta {
            path: path.to_path_buf(),
            entries,
            dirty: HashMap::new(),
        })
    }

    /// Value for `key`, preferring this handle's uncommitted writes.
    pub fn get(&self, key: &str) -> Option<u64> {
        self.dirty
            .get(key)
            .or_else(|| self.entries.get(key))
            .copied()
    }

    /// Stages a write; visible to peers after [`Meta::commit`].
    pub fn set(&mut self, key: &str, value: u64) {
        self.dirty.insert(key.to_string(), value);
    }

    /// Publishes staged writes: overlays them onto a fresh read of the file
    /// under the meta lock and rewrites it atomically.
    pub fn commit(&mut self) -> Result<()> {
        if self.dirty.is_empty() {
            return Ok(());
        }
        let _lock = FileLock::acquire(&sibling(&self.path, ".lock"))?;
        let mut entries = load_entries(&self.path)?;
        for (key, value) in self.dirty.drain() {
            entries.insert(key, value);
        }
        persist_entries(&self.path, &entries)?;
        self.entries = entries;
        Ok(())
    }

    /// Runs `f` against freshly loaded entries while the meta lock is held,
    /// then persists whatever `f` left behind. This is the atomic
    /// read-modify-write primitive: id allocation and the GC timestamp gate
    /// are both built on it.
    pub fn locked<R>(&mut self, f: impl FnOnce(&mut HashMap<String, u64>) -> R) -> Result<R> {
        let _lock = FileLock::acquire(&sibling(&self.path, ".lock"))?;
        let mut entries = load_entries(&self.path)?;
        let result = f(&mut entries);
        persist_entries(&self.path, &entries)?;
        self.entries = entries;
        Ok(result)
    }
}

fn load_entries(path: &Path) -> Result<HashMap<String, u64>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => {
            return Err(err)
                .wrap_err_with(|| format!("failed to read meta file '{}'", path.display()))
        }
    };
    if bytes.is_empty() {
        return Ok(HashMap::new());
    }

    let header: &MetaHeader = parse_zerocopy(&bytes, "meta header")?;
    ensure!(
        &header.magic == META_MAGIC,
        "'{}' is not a spool meta file",
        path.display()
    );
    ensure!(
        header.version() == CURRENT_VERSION,
        "unsupported meta version {} in '{}'",
        header.version(),
        path.display()
    );

    let mut entries = HashMap::with_capacity(header.count() as usize);
    let mut offset = META_HEADER_SIZE;
    for _ in 0..header.count() {
        ensure!(
            offset + 2 <= bytes.len(),
            "corrupt meta file '{}'",
            path.display()
        );
        let key_len = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as usize;
        offset += 2;
        ensure!(
            offset + key_len + 8 <= bytes.len(),
            "corrupt meta file '{}'",
            path.display()
        );
        let key = std::str::from_utf8(&bytes[offset..offset + key_len])
            .wrap_err_with(|| format!("corrupt meta key in '{}'", path.display()))?
            .to_string();
        offset += key_len;
        let mut value_bytes = [0u8; 8];
        value_bytes.copy_from_slice(&bytes[offset..offset + 8]);
        let value = u64::from_le_bytes(value_bytes);
        offset += 8;
        entries.insert(key, value);
    }
    Ok(entries)
}

fn persist_entries(path: &Path, entries: &HashMap<String, u64>) -> Result<()> {
    let mut buf = Vec::with_capacity(META_HEADER_SIZE + entries.len() * 24);
    buf.extend_from_slice(MetaHeader::new(entries.len() as u32).as_bytes());
    for (key, value) in entries {
        ensure!(
            key.len() <= u16::MAX as usize,
            "meta key '{}…' too long",
            &key[..16.min(key.len())]
        );
        buf.extend_from_slice(&(key.len() as u16).to_le_bytes());
        buf.extend_from_slice(key.as_bytes());
        buf.extend_from_slice(&value.to_le_bytes());
    }

    let tmp = sibling(path, ".tmp");
    let mut file = fs::File::create(&tmp)
        .wrap_err_with(|| format!("failed to create '{}'", tmp.display()))?;
    file.write_all(&buf)
        .wrap_err_with(|| format!("failed to write '{}'", tmp.display()))?;
    file.sync_all()
        .wrap_err_with(|| format!("failed to sync '{}'", tmp.display()))?;
    fs::rename(&tmp, path)
        .wrap_err_with(|| format!("failed to publish meta file '{}'", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn commit_round_trips_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta");

        let mut meta = Meta::open(&path).unwrap();
        assert_eq!(meta.get("id"), None);
        meta.set("id", 7);
        meta.set("gc_timestamp", 1234);
        meta.commit().unwrap();

        let reopened = Meta::open(&path).unwrap();
        assert_eq!(reopened.get("id"), Some(7));
        assert_eq!(reopened.get("gc_timestamp"), Some(1234));
    }

    #[test]
    fn uncommitted_writes_stay_local() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta");

        let mut meta = Meta::open(&path).unwrap();
        meta.set("id", 1);
        assert_eq!(meta.get("id"), Some(1));

        let peer = Meta::open(&path).unwrap();
        assert_eq!(peer.get("id"), None);
    }

    #[test]
    fn commit_overlays_onto_peer_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta");

        let mut a = Meta::open(&path).unwrap();
        let mut b = Meta::open(&path).unwrap();

        a.set("id", 1);
        a.commit().unwrap();
        b.set("gc_timestamp", 99);
        b.commit().unwrap();

        let merged = Meta::open(&path).unwrap();
        assert_eq!(merged.get("id"), Some(1));
        assert_eq!(merged.get("gc_timestamp"), Some(99));
    }

    #[test]
    fn locked_increments_are_not_lost() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let mut meta = Meta::open(&path).unwrap();
                    for _ in 0..25 {
                        meta.locked(|entries| {
                            let next = entries.get("id").copied().unwrap_or(0) + 1;
                            entries.insert("id".to_string(), next);
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let meta = Meta::open(&path).unwrap();
        assert_eq!(meta.get("id"), Some(100));
    }
}
