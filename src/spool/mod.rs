//! # Spool Module
//!
//! This module provides the multi-process fan-out layer: a directory of
//! immutable chunk files interposed between one sequential upstream and any
//! number of cooperating reader processes on the same host.
//!
//! ## Read Pipeline
//!
//! ```text
//! Spool::read_chunk(n)
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────┐
//! │ 1. SELECT: lowest chunk id whose ownership lock     │
//! │    can be taken without blocking                    │
//! └─────────────────────────────────────────────────────┘
//!     │ none loadable
//!     ▼
//! ┌─────────────────────────────────────────────────────┐
//! │ 2. REFILL: under the directory-wide refill lock,    │
//! │    pull uncommitted+1 records from a fresh upstream │
//! │    and publish them as a new chunk via rename       │
//! └─────────────────────────────────────────────────────┘
//!     │
//!     ▼
//! ┌─────────────────────────────────────────────────────┐
//! │ 3. DRAIN: proxy reads through the chunk's cursor;   │
//! │    at end, park the chunk until the next commit     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery Guarantees
//!
//! Within one chunk, records arrive in upstream order; chunk ids are
//! allocated monotonically, but concurrent readers interleave chunks
//! arbitrarily. A process never sees the same record twice between commits.
//! A process that exits (or crashes) without committing releases its
//! ownership locks, and the records it had consumed since its last commit
//! become visible again to the next owner of those chunks: delivery is
//! at-least-once across crashes, exactly-once between clean commits.
//!
//! ## Module Organization
//!
//! - `chunk`: the per-chunk state machine (create/load/drain/remove)
//! - `spool`: the directory coordinator and its builder
//! - `gc`: the directory sweep for crash debris

mod chunk;
mod gc;
#[allow(clippy::module_inception)]
mod spool;

pub use chunk::Chunk;
pub use spool::{Spool, SpoolBuilder};
