//! # Fan-Out Tests
//!
//! Several spools over one directory split the upstream between them: the
//! union of what they deliver is exactly the upstream content, with no
//! record delivered twice. Covers both deterministic in-process alternation
//! and a threaded free-for-all with interleaved commits.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use fanspool::{Journal, JournalUpstream, Spool};
use tempfile::tempdir;

fn open_rw(source: &Path, dir: &Path) -> Spool {
    let source = source.to_path_buf();
    Spool::builder()
        .dir(dir)
        .upstream_with(move || JournalUpstream::open(&source))
        .open()
        .unwrap()
}

#[test]
fn two_spools_split_the_stream_without_overlap() {
    let tmp = tempdir().unwrap();
    let source = tmp.path().join("source");
    let journal = Journal::create(&source).unwrap();
    let records: Vec<Vec<u8>> = (b'a'..=b'z').map(|c| vec![c, b'\n']).collect();
    journal.append(&records).unwrap();
    let dir = tmp.path().join("spool");

    let mut left = open_rw(&source, &dir);
    let mut right = open_rw(&source, &dir);

    let mut out_left: Vec<Vec<u8>> = Vec::new();
    let mut out_right: Vec<Vec<u8>> = Vec::new();
    let (mut done_left, mut done_right) = (false, false);
    while !(done_left && done_right) {
        if !done_left {
            match left.read().unwrap() {
                Some(record) => out_left.push(record),
                None => done_left = true,
            }
        }
        if !done_right {
            match right.read().unwrap() {
                Some(record) => out_right.push(record),
                None => done_right = true,
            }
        }
    }
    left.commit().unwrap();
    right.commit().unwrap();

    assert!(out_left.len() >= 10, "left spool delivered {}", out_left.len());
    assert!(out_right.len() >= 10, "right spool delivered {}", out_right.len());

    let mut all: Vec<Vec<u8>> = out_left.iter().chain(out_right.iter()).cloned().collect();
    all.sort();
    let expected: Vec<Vec<u8>> = (b'a'..=b'z').map(|c| vec![c, b'\n']).collect();
    assert_eq!(all, expected);
}

#[test]
fn concurrent_readers_partition_a_large_stream() {
    const ITEMS: usize = 2000;
    const WORKERS: usize = 4;
    const ROUND_BATCH: usize = 5;

    let tmp = tempdir().unwrap();
    let source = tmp.path().join("numbers");
    let journal = Journal::create(&source).unwrap();
    let records: Vec<Vec<u8>> = (0..ITEMS).map(|i| i.to_string().into_bytes()).collect();
    journal.append(&records).unwrap();
    let dir = tmp.path().join("spool");

    // Workers read in barrier-paced rounds: every worker gets one pull per
    // round, so the shares below measure the protocol's fairness rather
    // than the OS scheduler's.
    let barrier = Arc::new(Barrier::new(WORKERS));
    let finished = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let source = source.clone();
            let dir = dir.clone();
            let barrier = Arc::clone(&barrier);
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                let mut spool = Spool::builder()
                    .dir(&dir)
                    .upstream_with(move || JournalUpstream::open(&source))
                    .open()
                    .unwrap();

                let mut out = Vec::new();
                let mut rounds = 0usize;
                let mut done = false;
                loop {
                    barrier.wait();
                    if !done {
                        match spool.read_chunk(ROUND_BATCH).unwrap() {
                            Some(records) => out.extend(records),
                            None => {
                                done = true;
                                finished.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                        rounds += 1;
                        // Stagger commit cadence so the workers' refill
                        // sizes and lock patterns diverge.
                        if rounds % (4 + worker) == 0 {
                            spool.commit().unwrap();
                        }
                    }
                    barrier.wait();
                    if finished.load(Ordering::SeqCst) == WORKERS {
                        break;
                    }
                }
                spool.commit().unwrap();
                out
            })
        })
        .collect();

    let mut all: Vec<Vec<u8>> = Vec::new();
    let mut shares = Vec::new();
    for handle in handles {
        let out = handle.join().unwrap();
        shares.push(out.len());
        all.extend(out);
    }

    // No premature starvation: every worker delivers at least 80% of its
    // fair share of the stream.
    let fair_share = ITEMS / WORKERS;
    for (worker, share) in shares.iter().enumerate() {
        assert!(
            share * 5 >= fair_share * 4,
            "worker {worker} delivered {share} records of a fair share of {fair_share}"
        );
    }

    let mut seen: Vec<usize> = all
        .iter()
        .map(|record| std::str::from_utf8(record).unwrap().parse().unwrap())
        .collect();
    seen.sort_unstable();
    let expected: Vec<usize> = (0..ITEMS).collect();
    assert_eq!(seen, expected);
}
