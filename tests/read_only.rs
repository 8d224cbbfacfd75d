//! # Read-Only Peer Tests
//!
//! A read-only spool inspects a directory that live readers are working on:
//! it takes no locks, writes nothing, and once the buffered chunks are
//! exhausted it falls through to a fresh upstream instance. Lag is reported
//! in unconsumed payload bytes across the upstream tail and every chunk this
//! peer has not yet drained.

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
fn read_only_peer_observes_all_records_and_tracks_lag() {
    let tmp = tempdir().unwrap();
    let source = letters_source(tmp.path());
    let dir = tmp.path().join("spool");

    // Reader 1 consumes three records and stays open, holding its chunks.
    let mut live = open_rw(&source, &dir);
    for _ in 0..3 {
        live.read().unwrap().unwrap();
    }

    // Reader 2 consumes three more and exits without committing; its locks
    // are released and its cursors were never advanced on disk.
    {
        let mut transient = open_rw(&source, &dir);
        for _ in 0..3 {
            transient.read().unwrap().unwrap();
        }
    }

    let source_ro = source.clone();
    let mut peer = Spool::builder()
        .dir(&dir)
        .upstream_with(move || JournalUpstream::open(&source_ro))
        .read_only(true)
        .open()
        .unwrap();

    // Every buffered record is visible, in chunk id order, locks or not.
    let expected: Vec<Vec<u8>> = (b'a'..=b'e').map(|c| vec![c, b'\n']).collect();
    assert_eq!(peer.read_chunk(5).unwrap().unwrap(), expected);
    assert_eq!(peer.lag().unwrap(), (26 - 5) * 2);

    // The sixth buffered record, then straight from the upstream.
    let expected: Vec<Vec<u8>> = (b'f'..=b'o').map(|c| vec![c, b'\n']).collect();
    assert_eq!(peer.read_chunk(10).unwrap().unwrap(), expected);
    assert_eq!(peer.lag().unwrap(), (26 - 15) * 2);

    drop(live);
}

#[test]
fn exhausted_passthrough_stays_exhausted() {
    let tmp = tempdir().unwrap();
    let source = letters_source(tmp.path());
    let dir = tmp.path().join("spool");
    drop(open_rw(&source, &dir)); // creates the directory

    let source_ro = source.clone();
    let mut peer = Spool::builder()
        .dir(&dir)
        .upstream_with(move || JournalUpstream::open(&source_ro))
        .read_only(true)
        .open()
        .unwrap();

    assert_eq!(peer.read_chunk(100).unwrap().unwrap().len(), 26);
    assert!(peer.read().unwrap().is_none());
    assert!(peer.read().unwrap().is_none());
}
