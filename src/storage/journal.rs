//! # Record Journal
//!
//! Append-only record log used both for immutable chunk payloads and for
//! source streams that feed a spool. A journal file is a fixed header
//! followed by framed records:
//!
//! ```text
//! +------------------+------------------+------------------+----
//! | Journal Header   | Record Header    | Payload          | ...
//! | (40 bytes)       | (16 bytes)       | (len bytes)      |
//! +------------------+------------------+------------------+----
//! ```
//!
//! The journal header carries the record count and total payload size; the
//! count is the commit point for appends. Each record header carries the
//! payload length and a CRC-64/ECMA-182 checksum over the payload, validated
//! on every read.
//!
//! ## Write Protocol
//!
//! One-shot creation ([`Journal::write_new`]) writes header and frames into a
//! fresh file and fsyncs it; the caller renames it into place. Appends
//! ([`Journal::append`]) serialize through the `<path>.lock` file lock, write
//! the new frames after the committed region, fsync, and only then publish
//! them by rewriting the header counts. A reader that observes the old header
//! simply does not see the trailing bytes.
//!
//! ## Consumer Cursors
//!
//! [`JournalCursor`] maps the journal read-only and tracks a position that
//! persists in a sidecar cursor file (`.status`). The cursor file appears on
//! the first [`JournalCursor::commit`] and is rewritten under its `.lock`
//! sidecar; opening a cursor, read-write or read-only, never writes anything,
//! so instantiating a consumer (a capability probe, a read-only passthrough)
//! leaves the filesystem untouched. A missing cursor file reads as position
//! zero.
//!
//! A cursor's `lag` is the number of unconsumed payload bytes, which is cheap
//! to maintain and additive across cursors and upstream tails.
//!
//! ## Concurrency
//!
//! The caller is responsible for writer exclusion on cursor files (the spool
//! layer guarantees it through chunk ownership locks); the `.status.lock`
//! sidecar only serializes the commit write itself so concurrent read-only
//! peers never observe a torn header.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{ensure, Result, WrapErr};
use memmap2::Mmap;
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{CHUNK_FILE_MODE, CURRENT_VERSION, CURSOR_MAGIC, JOURNAL_MAGIC};
use crate::storage::{parse_zerocopy, sibling, FileLock};

pub const JOURNAL_HEADER_SIZE: usize = 40;
pub const RECORD_HEADER_SIZE: usize = 16;
pub const CURSOR_HEADER_SIZE: usize = 32;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
struct JournalHeader {
    magic: [u8; 16],
    version: U32,
    _reserved: U32,
    record_count: U64,
    payload_bytes: U64,
}

impl JournalHeader {
    fn empty() -> Self {
        Self {
            magic: *JOURNAL_MAGIC,
            version: U32::new(CURRENT_VERSION),
            _reserved: U32::new(0),
            record_count: U64::new(0),
            payload_bytes: U64::new(0),
        }
    }

    fn validate(&self, path: &Path) -> Result<()> {
        ensure!(
            &self.magic == JOURNAL_MAGIC,
            "'{}' is not a journal file",
            path.display()
        );
        ensure!(
            self.version() == CURRENT_VERSION,
            "unsupported journal version {} in '{}'",
            self.version(),
            path.display()
        );
        Ok(())
    }

    le_fields! {
        version: u32,
        mut record_count: u64,
        mut payload_bytes: u64,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
struct RecordHeader {
    len: U32,
    _reserved: U32,
    checksum: U64,
}

impl RecordHeader {
    fn new(payload: &[u8]) -> Self {
        Self {
            len: U32::new(payload.len() as u32),
            _reserved: U32::new(0),
            checksum: U64::new(CRC64.checksum(payload)),
        }
    }

    le_fields! {
        len: u32,
        checksum: u64,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
struct CursorHeader {
    magic: [u8; 16],
    version: U32,
    _reserved: U32,
    committed: U64,
}

impl CursorHeader {
    fn new(committed: u64) -> Self {
        Self {
            magic: *CURSOR_MAGIC,
            version: U32::new(CURRENT_VERSION),
            _reserved: U32::new(0),
            committed: U64::new(committed),
        }
    }

    le_fields! {
        version: u32,
        committed: u64,
    }
}

/// Handle on an appendable journal file. Stateless: every operation re-reads
/// the on-disk header, so handles in different processes stay coherent.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    /// Creates a fresh empty journal. Fails if the path exists.
    pub fn create(path: &Path) -> Result<Journal> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create journal '{}'", path.display()))?;
        file.write_all(JournalHeader::empty().as_bytes())
            .wrap_err_with(|| format!("failed to write journal header '{}'", path.display()))?;
        file.sync_all()
            .wrap_err_with(|| format!("failed to sync journal '{}'", path.display()))?;
        Ok(Journal {
            path: path.to_path_buf(),
        })
    }

    /// Opens an existing journal, validating its header.
    pub fn open(path: &Path) -> Result<Journal> {
        let bytes = fs::read(path)
            .wrap_err_with(|| format!("failed to read journal '{}'", path.display()))?;
        let header: &JournalHeader = parse_zerocopy(&bytes, "journal header")?;
        header.validate(path)?;
        Ok(Journal {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes a complete journal containing `records` to a fresh file created
    /// world-readable, and fsyncs it. Fails if the path exists. The caller
    /// publishes the file by renaming it into place.
    pub fn write_new(path: &Path, records: &[impl AsRef<[u8]>]) -> Result<()> {
        let (frames, payload_bytes) = build_frames(records)?;
        let mut header = JournalHeader::empty();
        header.set_record_count(records.len() as u64);
        header.set_payload_bytes(payload_bytes);

        let mut opts = OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(CHUNK_FILE_MODE);
        }
        let mut file = opts
            .open(path)
            .wrap_err_with(|| format!("failed to create journal '{}'", path.display()))?;
        file.write_all(header.as_bytes())
            .wrap_err_with(|| format!("failed to write journal '{}'", path.display()))?;
        file.write_all(&frames)
            .wrap_err_with(|| format!("failed to write journal '{}'", path.display()))?;
        file.sync_all()
            .wrap_err_with(|| format!("failed to sync journal '{}'", path.display()))?;
        Ok(())
    }

    /// Appends records and publishes them by rewriting the header counts.
    /// Serialized across processes through the `<path>.lock` file lock.
    pub fn append(&self, records: &[impl AsRef<[u8]>]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let _lock = FileLock::acquire(&sibling(&self.path, ".lock"))?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .wrap_err_with(|| format!("failed to open journal '{}'", self.path.display()))?;

        let mut header_bytes = [0u8; JOURNAL_HEADER_SIZE];
        file.read_exact(&mut header_bytes)
            .wrap_err_with(|| format!("failed to read journal header '{}'", self.path.display()))?;
        let mut header = JournalHeader::read_from_bytes(&header_bytes[..])
            .map_err(|e| eyre::eyre!("invalid journal header in '{}': {:?}", self.path.display(), e))?;
        header.validate(&self.path)?;

        // Walk the committed region to find the append offset.
        let mut offset = JOURNAL_HEADER_SIZE as u64;
        for _ in 0..header.record_count() {
            let mut rec_bytes = [0u8; RECORD_HEADER_SIZE];
            file.seek(SeekFrom::Start(offset)).wrap_err("failed to seek journal")?;
            file.read_exact(&mut rec_bytes)
                .wrap_err_with(|| format!("truncated journal '{}'", self.path.display()))?;
            let rec = RecordHeader::read_from_bytes(&rec_bytes[..]).map_err(|e| {
                eyre::eyre!("invalid record header in '{}': {:?}", self.path.display(), e)
            })?;
            offset += (RECORD_HEADER_SIZE + rec.len() as usize) as u64;
        }

        let (frames, payload_bytes) = build_frames(records)?;
        file.seek(SeekFrom::Start(offset)).wrap_err("failed to seek journal")?;
        file.write_all(&frames)
            .wrap_err_with(|| format!("failed to append to journal '{}'", self.path.display()))?;
        file.sync_data()
            .wrap_err_with(|| format!("failed to sync journal '{}'", self.path.display()))?;

        // Publish: the header count is the commit point.
        header.set_record_count(header.record_count() + records.len() as u64);
        header.set_payload_bytes(header.payload_bytes() + payload_bytes);
        file.seek(SeekFrom::Start(0)).wrap_err("failed to seek journal")?;
        file.write_all(header.as_bytes())
            .wrap_err_with(|| format!("failed to publish journal '{}'", self.path.display()))?;
        file.sync_data()
            .wrap_err_with(|| format!("failed to sync journal '{}'", self.path.display()))?;
        Ok(())
    }

    /// Number of committed records.
    pub fn record_count(&self) -> Result<u64> {
        let bytes = fs::read(&self.path)
            .wrap_err_with(|| format!("failed to read journal '{}'", self.path.display()))?;
        let header: &JournalHeader = parse_zerocopy(&bytes, "journal header")?;
        header.validate(&self.path)?;
        Ok(header.record_count())
    }
}

fn build_frames(records: &[impl AsRef<[u8]>]) -> Result<(Vec<u8>, u64)> {
    let mut payload_bytes = 0u64;
    let mut size = 0usize;
    for record in records {
        let record = record.as_ref();
        ensure!(
            record.len() <= u32::MAX as usize,
            "record of {} bytes exceeds the journal frame limit",
            record.len()
        );
        payload_bytes += record.len() as u64;
        size += RECORD_HEADER_SIZE + record.len();
    }
    let mut frames = Vec::with_capacity(size);
    for record in records {
        let record = record.as_ref();
        frames.extend_from_slice(RecordHeader::new(record).as_bytes());
        frames.extend_from_slice(record);
    }
    Ok((frames, payload_bytes))
}

#[derive(Debug, Clone, Copy)]
struct RecordSlot {
    offset: usize,
    len: u32,
    checksum: u64,
}

/// Consumer cursor over a journal: a read-only mapping of the committed
/// region plus a persistent position in a sidecar cursor file.
#[derive(Debug)]
pub struct JournalCursor {
    journal_path: PathBuf,
    cursor_path: PathBuf,
    map: Mmap,
    records: Vec<RecordSlot>,
    total_payload: u64,
    position: usize,
    consumed_payload: u64,
    read_only: bool,
}

impl JournalCursor {
    /// Opens a read-write cursor. Opening never touches the cursor file; it
    /// appears on the first [`JournalCursor::commit`]. The caller must
    /// guarantee writer exclusion (the spool layer does, through chunk
    /// ownership locks).
    pub fn open(journal_path: &Path, cursor_path: &Path) -> Result<JournalCursor> {
        Self::open_inner(journal_path, cursor_path, false)
    }

    /// Opens a read-only cursor that never creates or writes the cursor
    /// file. It starts from whatever position a peer last committed.
    pub fn open_ro(journal_path: &Path, cursor_path: &Path) -> Result<JournalCursor> {
        Self::open_inner(journal_path, cursor_path, true)
    }

    fn open_inner(journal_path: &Path, cursor_path: &Path, read_only: bool) -> Result<JournalCursor> {
        let file = File::open(journal_path)
            .wrap_err_with(|| format!("failed to open journal '{}'", journal_path.display()))?;
        let map = unsafe { Mmap::map(&file) }
            .wrap_err_with(|| format!("failed to map journal '{}'", journal_path.display()))?;

        let (record_count, records, total_payload) = {
            let header: &JournalHeader = parse_zerocopy(&map, "journal header")?;
            header.validate(journal_path)?;
            let record_count = header.record_count();

            let mut records = Vec::with_capacity(record_count as usize);
            let mut total_payload = 0u64;
            let mut offset = JOURNAL_HEADER_SIZE;
            for index in 0..record_count {
                ensure!(
                    offset + RECORD_HEADER_SIZE <= map.len(),
                    "journal '{}' truncated at record {}",
                    journal_path.display(),
                    index
                );
                let rec: &RecordHeader = parse_zerocopy(&map[offset..], "record header")?;
                let len = rec.len();
                let payload_offset = offset + RECORD_HEADER_SIZE;
                ensure!(
                    payload_offset + len as usize <= map.len(),
                    "journal '{}' truncated at record {}",
                    journal_path.display(),
                    index
                );
                records.push(RecordSlot {
                    offset: payload_offset,
                    len,
                    checksum: rec.checksum(),
                });
                total_payload += len as u64;
                offset = payload_offset + len as usize;
            }
            (record_count, records, total_payload)
        };

        let committed = read_cursor_file(cursor_path)?.unwrap_or(0);
        // A peer's cursor may outrun a journal snapshot mapped before its
        // last append; clamp rather than error.
        let position = (committed.min(record_count)) as usize;
        let consumed_payload = records[..position].iter().map(|slot| slot.len as u64).sum();

        Ok(JournalCursor {
            journal_path: journal_path.to_path_buf(),
            cursor_path: cursor_path.to_path_buf(),
            map,
            records,
            total_payload,
            position,
            consumed_payload,
            read_only,
        })
    }

    /// Reads up to `n` records. `None` means the cursor is at the end of the
    /// journal's committed region.
    pub fn read_chunk(&mut self, n: usize) -> Result<Option<Vec<Vec<u8>>>> {
        if self.position >= self.records.len() {
            return Ok(None);
        }
        let end = (self.position + n).min(self.records.len());
        let mut out = Vec::with_capacity(end - self.position);
        for index in self.position..end {
            let slot = self.records[index];
            let payload = &self.map[slot.offset..slot.offset + slot.len as usize];
            ensure!(
                CRC64.checksum(payload) == slot.checksum,
                "checksum mismatch in journal '{}' record {}",
                self.journal_path.display(),
                index
            );
            out.push(payload.to_vec());
            self.consumed_payload += slot.len as u64;
        }
        self.position = end;
        Ok(Some(out))
    }

    /// Reads a single record; `None` at end.
    pub fn read(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self
            .read_chunk(1)?
            .and_then(|mut records| (!records.is_empty()).then(|| records.remove(0))))
    }

    /// Persists the current position to the cursor file.
    pub fn commit(&mut self) -> Result<()> {
        ensure!(
            !self.read_only,
            "commit on a read-only cursor for '{}'",
            self.journal_path.display()
        );
        let _lock = FileLock::acquire(&sibling(&self.cursor_path, ".lock"))?;
        write_cursor_file(&self.cursor_path, self.position as u64)
    }

    /// Unconsumed payload bytes between the position and the journal end.
    pub fn lag(&self) -> u64 {
        self.total_payload - self.consumed_payload
    }
}

fn read_cursor_file(path: &Path) -> Result<Option<u64>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .wrap_err_with(|| format!("failed to read cursor file '{}'", path.display()))
        }
    };
    if bytes.len() < CURSOR_HEADER_SIZE {
        // A crash between create and the initial write leaves a short file;
        // treat it as an unset cursor.
        return Ok(None);
    }
    let header: &CursorHeader = parse_zerocopy(&bytes, "cursor header")?;
    ensure!(
        &header.magic == CURSOR_MAGIC,
        "'{}' is not a cursor file",
        path.display()
    );
    ensure!(
        header.version() == CURRENT_VERSION,
        "unsupported cursor version {} in '{}'",
        header.version(),
        path.display()
    );
    Ok(Some(header.committed()))
}

fn write_cursor_file(path: &Path, committed: u64) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .open(path)
        .wrap_err_with(|| format!("failed to open cursor file '{}'", path.display()))?;
    file.write_all(CursorHeader::new(committed).as_bytes())
        .wrap_err_with(|| format!("failed to write cursor file '{}'", path.display()))?;
    file.sync_data()
        .wrap_err_with(|| format!("failed to sync cursor file '{}'", path.display()))?;
    Ok(())
}
