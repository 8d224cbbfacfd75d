//! The spool coordinator: discovers chunks, steals the lowest lockable one,
//! refills from the upstream under the directory-wide refill lock, and
//! tracks what this process has drained but not yet committed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{ensure, eyre, Result, WrapErr};
use hashbrown::HashMap;

use crate::config::{
    DEFAULT_GC_PERIOD_SECS, META_FILE_NAME, META_KEY_ID, REFILL_LOCK_FILE_NAME,
    REFILL_RETRY_DELAY_MS,
};
use crate::spool::chunk::{parse_chunk_file_name, Chunk};
use crate::storage::{FileLock, Meta};
use crate::upstream::{SharedUpstream, Upstream, UpstreamFactory};

/// What this process is currently draining.
pub(crate) enum Current {
    Chunk(Chunk),
    /// Read-only fallback once the directory has nothing loadable: reads go
    /// straight to a fresh upstream instance without disturbing any peer.
    Passthrough(Box<dyn Upstream>),
}

enum Refill {
    /// A fresh chunk was created and locked by this process.
    Loaded(Chunk),
    /// The upstream is exhausted.
    Exhausted,
    /// A peer holds the refill lock; rescan, its chunk will appear.
    Contended,
}

/// Multi-process fan-out spool over a directory of chunk files.
///
/// Each process holds at most one in-flight chunk at a time plus the chunks
/// it has drained since its last commit; everything else on disk is up for
/// grabs by any peer, coordinated purely through advisory file locks and
/// atomic renames.
pub struct Spool {
    pub(crate) dir: PathBuf,
    pub(crate) read_only: bool,
    pub(crate) refill_lock: bool,
    pub(crate) gc_period: Duration,
    pub(crate) factory: UpstreamFactory,
    pub(crate) meta: Option<Meta>,
    pub(crate) current: Option<Current>,
    pub(crate) prev_chunks: HashMap<u64, Chunk>,
    pub(crate) uncommitted: u64,
    pub(crate) gc_timestamp_cached: Option<u64>,
}

impl Spool {
    pub fn builder() -> SpoolBuilder {
        SpoolBuilder {
            dir: None,
            factory: None,
            gc_period: Duration::from_secs(DEFAULT_GC_PERIOD_SECS),
            read_only: false,
            refill_lock: true,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads up to `n` records, draining buffered chunks in ascending id
    /// order and refilling from the upstream as needed. `None` when nothing
    /// is available anywhere.
    pub fn read_chunk(&mut self, n: usize) -> Result<Option<Vec<Vec<u8>>>> {
        let mut out: Vec<Vec<u8>> = Vec::new();
        let mut remaining = n;
        while remaining > 0 {
            if self.current.is_none() && !self.advance()? {
                break;
            }
            let batch = match self.current.as_mut() {
                Some(Current::Chunk(chunk)) => chunk.read_chunk(remaining)?,
                Some(Current::Passthrough(upstream)) => upstream.read_chunk(remaining)?,
                None => break,
            };
            match batch {
                Some(records) if !records.is_empty() => {
                    self.uncommitted += records.len() as u64;
                    remaining = remaining.saturating_sub(records.len());
                    out.extend(records);
                }
                _ => match self.current.take() {
                    Some(Current::Chunk(chunk)) => {
                        // Drained to the end; parked with its lock held
                        // until the next commit.
                        self.prev_chunks.insert(chunk.id(), chunk);
                    }
                    Some(passthrough @ Current::Passthrough(_)) => {
                        self.current = Some(passthrough);
                        break;
                    }
                    None => break,
                },
            }
        }
        Ok((!out.is_empty()).then_some(out))
    }

    /// Reads a single record; `None` when nothing is available anywhere.
    pub fn read(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self
            .read_chunk(1)?
            .and_then(|mut records| (!records.is_empty()).then(|| records.remove(0))))
    }

    /// Persists this process's progress: commits the current chunk's cursor
    /// and releases it, removes every chunk drained since the last commit,
    /// and resets the refill sizing counter.
    pub fn commit(&mut self) -> Result<()> {
        ensure!(!self.read_only, "commit on a read-only spool");
        if let Some(Current::Chunk(mut chunk)) = self.current.take() {
            chunk.commit()?;
        }
        for (_, mut chunk) in self.prev_chunks.drain() {
            chunk.remove()?;
        }
        self.uncommitted = 0;
        Ok(())
    }

    /// Unconsumed payload bytes across every chunk file in the directory,
    /// excluding chunks this process has already drained. The current
    /// chunk's live cursor is consulted; every other chunk is inspected
    /// through a read-only clone that takes no lock.
    pub fn buffer_lag(&mut self) -> Result<u64> {
        let current_id = match self.current.as_ref() {
            Some(Current::Chunk(chunk)) => Some(chunk.id()),
            _ => None,
        };
        let mut total = 0u64;
        for id in self.chunk_ids()? {
            if self.prev_chunks.contains_key(&id) {
                continue;
            }
            if current_id == Some(id) {
                if let Some(Current::Chunk(chunk)) = self.current.as_mut() {
                    total += chunk.lag();
                }
                continue;
            }
            total += Chunk::new(&self.dir, id, true).lag();
        }
        Ok(total)
    }

    /// Total unconsumed payload bytes: the upstream's remaining tail plus
    /// [`Spool::buffer_lag`]. Requires an upstream that reports lag.
    pub fn lag(&mut self) -> Result<u64> {
        let upstream_lag = match self.current.as_mut() {
            Some(Current::Passthrough(upstream)) => {
                ensure!(upstream.has_lag(), "upstream does not report lag");
                upstream.lag()?
            }
            _ => {
                let mut upstream = (self.factory)()?;
                ensure!(upstream.has_lag(), "upstream does not report lag");
                upstream.lag()?
            }
        };
        Ok(upstream_lag + self.buffer_lag()?)
    }

    /// Ensures `current` is set, falling back to the read-only passthrough
    /// when the directory has nothing loadable.
    fn advance(&mut self) -> Result<bool> {
        if self.next_chunk()? {
            return Ok(true);
        }
        if self.read_only {
            let upstream = (self.factory)()?;
            self.current = Some(Current::Passthrough(upstream));
            return Ok(true);
        }
        Ok(false)
    }

    /// Selects the next chunk: lowest lockable id first, then a refill.
    /// Returns `false` only when the upstream is exhausted (read-write) or
    /// nothing is loadable (read-only).
    fn next_chunk(&mut self) -> Result<bool> {
        loop {
            for id in self.chunk_ids()? {
                if self.prev_chunks.contains_key(&id) {
                    continue;
                }
                let mut chunk = Chunk::new(&self.dir, id, self.read_only);
                if chunk.load()? {
                    self.current = Some(Current::Chunk(chunk));
                    return Ok(true);
                }
            }
            if self.read_only {
                return Ok(false);
            }
            match self.refill()? {
                Refill::Loaded(chunk) => {
                    self.current = Some(Current::Chunk(chunk));
                    return Ok(true);
                }
                Refill::Exhausted => return Ok(false),
                Refill::Contended => {
                    std::thread::sleep(Duration::from_millis(REFILL_RETRY_DELAY_MS));
                }
            }
        }
    }

    /// One round of pulling from the upstream into a fresh chunk. Loops
    /// internally when the chunk it just created is locked by a peer before
    /// this process gets to it; the creator is not guaranteed to be the
    /// first locker.
    fn refill(&mut self) -> Result<Refill> {
        loop {
            let refill_guard = if self.refill_lock {
                match FileLock::try_acquire(&self.dir.join(REFILL_LOCK_FILE_NAME))? {
                    Some(guard) => Some(guard),
                    None => return Ok(Refill::Contended),
                }
            } else {
                None
            };

            // A fresh instance per pull observes the latest persisted
            // upstream cursor, no matter which process committed it last.
            let mut upstream = (self.factory)()?;
            let want = self.uncommitted as usize + 1;
            let records = match upstream.read_chunk(want)? {
                Some(records) if !records.is_empty() => records,
                _ => return Ok(Refill::Exhausted),
            };

            let id = self.next_id()?;
            let mut chunk = Chunk::new(&self.dir, id, false);
            chunk.create(&records)?;
            upstream.commit()?;
            // Not held across the chunk lock acquisition; a peer may take
            // the new chunk first.
            drop(refill_guard);

            if chunk.load()? {
                return Ok(Refill::Loaded(chunk));
            }
            tracing::debug!(id, "new chunk locked by a peer before load; pulling again");
        }
    }

    fn next_id(&mut self) -> Result<u64> {
        let meta = self.meta.as_mut().expect("meta is open in read-write mode");
        meta.locked(|entries| {
            let next = entries.get(META_KEY_ID).copied().unwrap_or(0) + 1;
            entries.insert(META_KEY_ID.to_string(), next);
            next
        })
    }

    /// Numeric ids of every chunk file in the directory, ascending. Oldest
    /// first keeps readers biased toward the lag tail.
    pub(crate) fn chunk_ids(&self) -> Result<Vec<u64>> {
        let entries = fs::read_dir(&self.dir)
            .wrap_err_with(|| format!("failed to read spool directory '{}'", self.dir.display()))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.wrap_err("failed to read spool directory entry")?;
            if let Some(id) = parse_chunk_file_name(&entry.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

impl Upstream for Spool {
    fn read_chunk(&mut self, n: usize) -> Result<Option<Vec<Vec<u8>>>> {
        Spool::read_chunk(self, n)
    }

    fn read(&mut self) -> Result<Option<Vec<u8>>> {
        Spool::read(self)
    }

    fn commit(&mut self) -> Result<()> {
        Spool::commit(self)
    }

    fn has_lag(&self) -> bool {
        (self.factory)().map(|upstream| upstream.has_lag()).unwrap_or(false)
    }

    fn lag(&mut self) -> Result<u64> {
        Spool::lag(self)
    }
}

/// Builder for [`Spool`].
pub struct SpoolBuilder {
    dir: Option<PathBuf>,
    factory: Option<UpstreamFactory>,
    gc_period: Duration,
    read_only: bool,
    refill_lock: bool,
}

impl SpoolBuilder {
    /// Spool directory. Created on open unless the spool is read-only.
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Upstream as a concrete instance. Wrapped so that every refill's
    /// "fresh instance" is a handle on this one; prefer
    /// [`SpoolBuilder::upstream_with`] for upstreams that can re-open their
    /// persisted cursor.
    pub fn upstream(mut self, upstream: impl Upstream + 'static) -> Self {
        let shared = SharedUpstream::new(upstream);
        self.factory = Some(Box::new(move || {
            Ok(Box::new(shared.clone()) as Box<dyn Upstream>)
        }));
        self
    }

    /// Upstream as a factory invoked once per refill.
    pub fn upstream_with<U, F>(mut self, factory: F) -> Self
    where
        U: Upstream + 'static,
        F: Fn() -> Result<U> + Send + 'static,
    {
        self.factory = Some(Box::new(move || {
            factory().map(|upstream| Box::new(upstream) as Box<dyn Upstream>)
        }));
        self
    }

    /// Minimum interval between GC runs. Default 300 seconds.
    pub fn gc_period(mut self, period: Duration) -> Self {
        self.gc_period = period;
        self
    }

    /// Disables all mutation: no locks, no writes, no id allocation, no GC.
    /// With nothing loadable, reads fall through to the upstream directly.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Whether refills serialize across processes through the directory-wide
    /// refill lock. Default true; turn off for upstreams that do their own
    /// locking.
    pub fn refill_lock(mut self, refill_lock: bool) -> Self {
        self.refill_lock = refill_lock;
        self
    }

    pub fn open(self) -> Result<Spool> {
        let dir = self.dir.ok_or_else(|| eyre!("a spool directory is required"))?;
        let factory = self.factory.ok_or_else(|| eyre!("an upstream is required"))?;

        let meta = if self.read_only {
            ensure!(
                dir.is_dir(),
                "read-only spool requires an existing directory '{}'",
                dir.display()
            );
            None
        } else {
            fs::create_dir_all(&dir).wrap_err_with(|| {
                format!("failed to create spool directory '{}'", dir.display())
            })?;
            Some(Meta::open(&dir.join(META_FILE_NAME))?)
        };

        let mut spool = Spool {
            dir,
            read_only: self.read_only,
            refill_lock: self.refill_lock,
            gc_period: self.gc_period,
            factory,
            meta,
            current: None,
            prev_chunks: HashMap::new(),
            uncommitted: 0,
            gc_timestamp_cached: None,
        };
        if !spool.read_only {
            spool.try_gc()?;
        }
        Ok(spool)
    }
}
