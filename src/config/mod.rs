//! # Fanspool Configuration Module
//!
//! This module centralizes all configuration constants for fanspool. Constants
//! are grouped by their functional area and interdependencies are documented
//! in one place.
//!
//! ## Why Centralization?
//!
//! The spool, chunk, and journal layers share a number of on-disk naming
//! conventions (`.chunk`, `.status`, `.lock`, tmp staging names) and timing
//! values (GC period, tmp expiry). Scattering them across files invites
//! mismatch bugs: GC must recognize exactly the names the chunk layer
//! produces. By co-locating them, a rename in one layer cannot silently break
//! another.
//!
//! ## Module Organization
//!
//! - [`constants`]: All naming and timing values with dependency documentation

pub mod constants;
pub use constants::*;
