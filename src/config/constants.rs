//! # Fanspool Configuration Constants
//!
//! This module centralizes the naming and timing constants shared by the
//! spool, chunk, journal, and GC layers. Constants that depend on each other
//! are co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! CHUNK_SUFFIX (".chunk")
//!       │
//!       ├─> STATUS_SUFFIX (".status")
//!       │     The journal cursor sidecar; GC recognizes "{id}.status" and
//!       │     "{id}.status.lock" as chunk sidecars and routes them through
//!       │     Chunk::cleanup.
//!       │
//!       ├─> LOCK_SUFFIX (".lock")
//!       │     Ownership lock for "{id}.chunk"; also the suffix the journal
//!       │     appends to any cursor or source path for its internal locks.
//!       │
//!       └─> TMP_MARKER ("tmp")
//!             Staging names are "{id}.tmp.{pid}.{unix_time}.{uid}"; GC
//!             parses the embedded unix_time to apply TMP_EXPIRY_SECS.
//!
//! DEFAULT_GC_PERIOD_SECS (300)
//!       │
//!       └─> TMP_EXPIRY_SECS (600)
//!             Must comfortably exceed the longest plausible refill so a
//!             live writer's staging file is never reaped mid-write.
//! ```
//!
//! ## Usage
//!
//! Import constants from this module rather than defining them locally:
//!
//! ```ignore
//! use crate::config::{CHUNK_SUFFIX, DEFAULT_GC_PERIOD_SECS};
//! ```

// ============================================================================
// SPOOL DIRECTORY LAYOUT
// The GC classifier depends on every name below; keep them in sync with the
// parsers in spool::chunk.
// ============================================================================

/// Suffix of immutable chunk payload files: `{id}.chunk`.
pub const CHUNK_SUFFIX: &str = "chunk";

/// Suffix of per-chunk persistent cursor files: `{id}.status`.
pub const STATUS_SUFFIX: &str = "status";

/// Suffix of advisory lock files: `{id}.lock`, `{id}.status.lock`, `meta.lock`.
pub const LOCK_SUFFIX: &str = "lock";

/// Marker component of staging file names: `{id}.tmp.{pid}.{unix_time}.{uid}`.
pub const TMP_MARKER: &str = "tmp";

/// Name of the metadata key/value file inside the spool directory.
/// GC skips every name starting with this, which also covers "meta.lock"
/// and the transient "meta.tmp" rewrite staging file.
pub const META_FILE_NAME: &str = "meta";

/// Name of the directory-wide refill lock file.
pub const REFILL_LOCK_FILE_NAME: &str = "read_lock";

/// Mode bits for chunk payload files (and their staging files). Chunks are
/// world-readable so read-only peers under a different UID can inspect a
/// spool without being able to mutate it.
pub const CHUNK_FILE_MODE: u32 = 0o644;

// ============================================================================
// TIMING
// ============================================================================

/// Default minimum interval between GC runs, in seconds.
pub const DEFAULT_GC_PERIOD_SECS: u64 = 300;

/// Age after which an abandoned staging file is reaped by GC, in seconds.
/// Measured against the unix_time embedded in the staging file name.
/// Must comfortably exceed the longest plausible refill.
pub const TMP_EXPIRY_SECS: u64 = 600;

/// How long a reader sleeps before rescanning the spool directory when the
/// refill lock is held by a peer. The peer will either publish a chunk we
/// can steal or release the lock.
pub const REFILL_RETRY_DELAY_MS: u64 = 1;

// ============================================================================
// ON-DISK FORMATS
// 16-byte magics in the style of the file headers; bump CURRENT_VERSION on
// any layout change.
// ============================================================================

/// Magic prefix of journal files (chunk payloads and source journals).
pub const JOURNAL_MAGIC: &[u8; 16] = b"fanspool journal";

/// Magic prefix of cursor (`.status`) files.
pub const CURSOR_MAGIC: &[u8; 16] = b"fanspool cursor\x00";

/// Magic prefix of the spool metadata file.
pub const META_MAGIC: &[u8; 16] = b"fanspool meta\x00\x00\x00";

/// On-disk format version shared by all three file types.
pub const CURRENT_VERSION: u32 = 1;

// ============================================================================
// METADATA KEYS
// ============================================================================

/// Meta key holding the last allocated chunk id.
pub const META_KEY_ID: &str = "id";

/// Meta key holding the wall-clock second of the last GC pass.
pub const META_KEY_GC_TIMESTAMP: &str = "gc_timestamp";
