//! Journal-backed upstream: reads a source journal through a persistent
//! cursor at `<path>.status`. Opening takes a fresh snapshot of the
//! journal's committed region, so the factory contract (one instance per
//! refill) is what makes appended records visible.

use std::path::Path;

use eyre::Result;

use crate::storage::{sibling, JournalCursor};
use crate::upstream::Upstream;

pub struct JournalUpstream {
    cursor: JournalCursor,
}

impl JournalUpstream {
    /// Opens the journal at `path` with its cursor at `<path>.status`.
    pub fn open(path: &Path) -> Result<JournalUpstream> {
        let cursor = JournalCursor::open(path, &sibling(path, ".status"))?;
        Ok(JournalUpstream { cursor })
    }
}

impl Upstream for JournalUpstream {
    fn read_chunk(&mut self, n: usize) -> Result<Option<Vec<Vec<u8>>>> {
        self.cursor.read_chunk(n)
    }

    fn commit(&mut self) -> Result<()> {
        self.cursor.commit()
    }

    fn has_lag(&self) -> bool {
        true
    }

    fn lag(&mut self) -> Result<u64> {
        Ok(self.cursor.lag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Journal;
    use tempfile::tempdir;

    #[test]
    fn fresh_instances_resume_from_the_committed_cursor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("source");
        let journal = Journal::create(&path).unwrap();
        journal.append(&[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]).unwrap();

        let mut first = JournalUpstream::open(&path).unwrap();
        assert_eq!(first.read().unwrap().unwrap(), b"a");
        first.commit().unwrap();
        assert_eq!(first.read().unwrap().unwrap(), b"b");
        drop(first);

        // "b" was consumed but never committed; a fresh instance re-reads it.
        let mut second = JournalUpstream::open(&path).unwrap();
        assert_eq!(second.lag().unwrap(), 2);
        assert_eq!(second.read().unwrap().unwrap(), b"b");
        assert_eq!(second.lag().unwrap(), 1);
    }
}
