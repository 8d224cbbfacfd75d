//! # Linear Consumption Tests
//!
//! A single reader draining a spool: reads resume at the commit point across
//! reopens, uncommitted reads roll back, and a GC sweep between commits
//! never moves a cursor.

use std::path::{Path, PathBuf};

use fanspool::{Journal, JournalUpstream, Spool};
use tempfile::tempdir;

fn letters_source(dir: &Path) -> PathBuf {
    let path = dir.join("source");
    let journal = Journal::create(&path).unwrap();
    let records: Vec<Vec<u8>> = (b'a'..=b'z').map(|c| vec![c, b'\n']).collect();
    journal.append(&records).unwrap();
    path
}

fn open_rw(source: &Path, dir: &Path) -> Spool {
    let source = source.to_path_buf();
    Spool::builder()
        .dir(dir)
        .upstream_with(move || JournalUpstream::open(&source))
        .open()
        .unwrap()
}

#[test]
fn reads_resume_at_the_commit_point_across_reopens() {
    let tmp = tempdir().unwrap();
    let source = letters_source(tmp.path());
    let dir = tmp.path().join("spool");

    let mut spool = open_rw(&source, &dir);
    assert_eq!(spool.read().unwrap().unwrap(), b"a\n");
    assert_eq!(spool.read().unwrap().unwrap(), b"b\n");
    spool.commit().unwrap();
    drop(spool);

    let mut spool = open_rw(&source, &dir);
    assert_eq!(spool.read().unwrap().unwrap(), b"c\n");
    // Dropped without commit: "c\n" must be redelivered.
    drop(spool);

    let mut spool = open_rw(&source, &dir);
    assert_eq!(spool.read().unwrap().unwrap(), b"c\n");
}

#[test]
fn gc_between_commits_does_not_move_cursors() {
    let tmp = tempdir().unwrap();
    let source = letters_source(tmp.path());
    let dir = tmp.path().join("spool");

    let mut spool = open_rw(&source, &dir);
    assert_eq!(spool.read().unwrap().unwrap(), b"a\n");
    spool.commit().unwrap();

    assert_eq!(spool.read().unwrap().unwrap(), b"b\n");
    assert_eq!(spool.read().unwrap().unwrap(), b"c\n");
    spool.commit().unwrap();

    spool.gc().unwrap();
    assert_eq!(spool.read().unwrap().unwrap(), b"d\n");
}

#[test]
fn a_reader_crash_redelivers_only_the_uncommitted_tail() {
    let tmp = tempdir().unwrap();
    let source = letters_source(tmp.path());
    let dir = tmp.path().join("spool");

    let mut spool = open_rw(&source, &dir);
    let first = spool.read_chunk(4).unwrap().unwrap();
    spool.commit().unwrap();
    let second = spool.read_chunk(4).unwrap().unwrap();
    drop(spool); // crash: the second batch was never committed

    let mut spool = open_rw(&source, &dir);
    let redelivered = spool.read_chunk(4).unwrap().unwrap();
    assert_eq!(redelivered, second);
    assert_ne!(redelivered[0], first[0]);
}
