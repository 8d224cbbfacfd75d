//! # Fanspool - Disk-Backed Fan-Out Spool
//!
//! Fanspool turns a single sequential input stream into a stream that many
//! cooperating processes on one host can read concurrently without
//! duplicating or losing records. It interposes a directory of small
//! immutable on-disk "chunks" between the upstream (which caches its read
//! cursor and cannot tolerate parallel consumers) and N reader processes.
//!
//! ## Quick Start
//!
//! ```ignore
//! use fanspool::{JournalUpstream, Spool};
//!
//! let mut spool = Spool::builder()
//!     .dir("./spool")
//!     .upstream_with(|| JournalUpstream::open("./events".as_ref()))
//!     .open()?;
//!
//! while let Some(record) = spool.read()? {
//!     handle(&record);
//!     spool.commit()?;
//! }
//! ```
//!
//! Any number of processes can run that loop against the same directory;
//! each record is delivered to exactly one of them (at-least-once if a
//! reader crashes mid-batch).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Public API (Spool)           │
//! ├─────────────────────────────────────┤
//! │  Chunk state machine │ Directory GC │
//! ├──────────────────────┼──────────────┤
//! │  Journal + cursors   │ Meta KV file │
//! ├─────────────────────────────────────┤
//! │  Advisory file locks, atomic rename │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## Directory Layout
//!
//! ```text
//! spool_dir/
//! ├── 7.chunk        # immutable record batch, appears via rename
//! ├── 7.status       # persistent read cursor for chunk 7
//! ├── 7.lock         # ownership lock, held by the reader draining chunk 7
//! ├── meta           # chunk id counter, gc timestamp
//! └── read_lock      # serializes upstream pulls across processes
//! ```
//!
//! All coordination is through the filesystem: non-blocking advisory locks,
//! atomic rename, and a locked metadata file. There are no sockets, no
//! daemons, and no threads; crashed readers are recovered by lock release
//! and a rate-limited directory sweep.
//!
//! ## Module Overview
//!
//! - [`spool`]: chunk state machine, directory coordinator, GC
//! - [`storage`]: record journal, metadata file, advisory file lock
//! - [`upstream`]: the upstream trait, factory contract, reference impl
//! - [`config`]: naming and timing constants

#[macro_use]
mod macros;

pub mod config;
pub mod spool;
pub mod storage;
pub mod upstream;

pub use spool::{Chunk, Spool, SpoolBuilder};
pub use storage::{FileLock, Journal, JournalCursor, Meta};
pub use upstream::{JournalUpstream, SharedUpstream, Upstream, UpstreamFactory};
