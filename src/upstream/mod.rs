//! # Upstream Streams
//!
//! An upstream is the sequential producer-side stream a spool pulls from:
//! bulk reads, an idempotent commit of the consumed position, and an
//! optional lag report. Upstreams are single-consumer by contract (many of
//! them cache their persistent cursor inside the instance), which is exactly
//! why the spool exists.
//!
//! ## The Factory Contract
//!
//! A spool takes a *factory* rather than an instance: each refill constructs
//! a fresh upstream so the latest persisted cursor is observed, no matter
//! which process committed it last. Callers holding a concrete instance wrap
//! it in [`SharedUpstream`] at the boundary; its clones all delegate to the
//! one underlying instance, so the factory contract stays the only API.
//!
//! ## Lag Capability
//!
//! Lag reporting is probed at runtime through [`Upstream::has_lag`], not
//! expressed in the type system: a spool advertises lag exactly when its
//! upstream does, and that is only known at construction time.

mod journal_in;

pub use journal_in::JournalUpstream;

use std::sync::Arc;

use eyre::{bail, Result};
use parking_lot::Mutex;

/// A sequential record stream with a persistent consumed position.
pub trait Upstream: Send {
    /// Reads up to `n` records; `None` when the stream is exhausted.
    fn read_chunk(&mut self, n: usize) -> Result<Option<Vec<Vec<u8>>>>;

    /// Reads a single record; `None` when the stream is exhausted.
    fn read(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self
            .read_chunk(1)?
            .and_then(|mut records| (!records.is_empty()).then(|| records.remove(0))))
    }

    /// Persists the consumed position. Idempotent.
    fn commit(&mut self) -> Result<()>;

    /// Whether [`Upstream::lag`] is supported.
    fn has_lag(&self) -> bool {
        false
    }

    /// Unconsumed payload bytes remaining in the stream.
    fn lag(&mut self) -> Result<u64> {
        bail!("upstream does not report lag")
    }
}

/// Factory producing a fresh upstream per refill.
pub type UpstreamFactory = Box<dyn Fn() -> Result<Box<dyn Upstream>> + Send>;

/// Adapter that turns one concrete upstream instance into something a
/// factory can hand out repeatedly: every clone is a handle on the same
/// underlying instance, serialized through a mutex.
pub struct SharedUpstream {
    inner: Arc<Mutex<Box<dyn Upstream>>>,
    has_lag: bool,
}

impl SharedUpstream {
    pub fn new(upstream: impl Upstream + 'static) -> SharedUpstream {
        let has_lag = upstream.has_lag();
        SharedUpstream {
            inner: Arc::new(Mutex::new(Box::new(upstream))),
            has_lag,
        }
    }
}

impl Clone for SharedUpstream {
    fn clone(&self) -> Self {
        SharedUpstream {
            inner: Arc::clone(&self.inner),
            has_lag: self.has_lag,
        }
    }
}

impl Upstream for SharedUpstream {
    fn read_chunk(&mut self, n: usize) -> Result<Option<Vec<Vec<u8>>>> {
        self.inner.lock().read_chunk(n)
    }

    fn commit(&mut self) -> Result<()> {
        self.inner.lock().commit()
    }

    fn has_lag(&self) -> bool {
        self.has_lag
    }

    fn lag(&mut self) -> Result<u64> {
        self.inner.lock().lag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        next: u64,
        limit: u64,
    }

    impl Upstream for Counter {
        fn read_chunk(&mut self, n: usize) -> Result<Option<Vec<Vec<u8>>>> {
            if self.next >= self.limit {
                return Ok(None);
            }
            let end = (self.next + n as u64).min(self.limit);
            let out = (self.next..end).map(|v| v.to_string().into_bytes()).collect();
            self.next = end;
            Ok(Some(out))
        }

        fn commit(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn shared_clones_drain_one_instance() {
        let shared = SharedUpstream::new(Counter { next: 0, limit: 4 });
        let mut a = shared.clone();
        let mut b = shared.clone();

        assert_eq!(a.read().unwrap().unwrap(), b"0");
        assert_eq!(b.read().unwrap().unwrap(), b"1");
        assert_eq!(a.read_chunk(10).unwrap().unwrap().len(), 2);
        assert!(b.read().unwrap().is_none());
    }

    #[test]
    fn lag_defaults_to_unsupported() {
        let mut counter = Counter { next: 0, limit: 1 };
        assert!(!counter.has_lag());
        assert!(counter.lag().is_err());
    }
}
