use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engine::{ConsumedRecord, PartitionBackup, PartitionRestore};
use std::io::Cursor;

const N: usize = 1_000;
const VAL_SIZE: usize = 100;

fn record(i: usize) -> ConsumedRecord {
    ConsumedRecord {
        key: Some(format!("k{}", i).into_bytes()),
        value: Some(vec![b'x'; VAL_SIZE]),
        headers: vec![],
        partition: 0,
        offset: i as i64,
        timestamp_ms: 1_690_000_000_000 + i as i64,
    }
}

fn written_backup() -> Vec<u8> {
    let mut session = PartitionBackup::new(Vec::new()).unwrap();
    session.store_metadata("bench-topic", None, N as i64, 1).unwrap();
    for i in 0..N {
        session.store_record(record(i)).unwrap();
    }
    session.finish().unwrap()
}

fn backup_write(c: &mut Criterion) {
    c.bench_function("backup_write_1k", |b| {
        b.iter_batched(
            || (0..N).map(record).collect::<Vec<_>>(),
            |records| {
                let mut session = PartitionBackup::new(Vec::new()).unwrap();
                session
                    .store_metadata("bench-topic", None, N as i64, 1)
                    .unwrap();
                for r in records {
                    session.store_record(r).unwrap();
                }
                session.finish().unwrap()
            },
            BatchSize::SmallInput,
        );
    });
}

fn backup_read(c: &mut Criterion) {
    let buf = written_backup();

    c.bench_function("backup_read_1k", |b| {
        b.iter_batched(
            || Cursor::new(buf.clone()),
            |cursor| {
                let mut restore = PartitionRestore::new(cursor, "bench-topic").unwrap();
                restore.start().unwrap();
                let count = restore.sends().unwrap().map(|r| r.unwrap()).count();
                assert_eq!(count, N);
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, backup_write, backup_read);

criterion_main!(benches);
