use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use fanspool::{Journal, JournalUpstream, Spool};
use tempfile::TempDir;

fn drain_spool(c: &mut Criterion) {
    c.bench_function("drain_1k_records", |b| {
        b.iter_batched(
            || {
                let tmp = TempDir::new().unwrap();
                let source = tmp.path().join("source");
                let journal = Journal::create(&source).unwrap();
                let records: Vec<Vec<u8>> =
                    (0..1000u32).map(|i| i.to_le_bytes().to_vec()).collect();
                journal.append(&records).unwrap();
                (tmp, source)
            },
            |(tmp, source)| {
                let dir = tmp.path().join("spool");
                let mut spool = Spool::builder()
                    .dir(&dir)
                    .upstream_with(move || JournalUpstream::open(&source))
                    .open()
                    .unwrap();
                let mut drained = 0;
                while let Some(records) = spool.read_chunk(64).unwrap() {
                    drained += records.len();
                }
                spool.commit().unwrap();
                assert_eq!(drained, 1000);
                tmp
            },
            BatchSize::PerIteration,
        )
    });
}

criterion_group!(benches, drain_spool);
criterion_main!(benches);
