#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::uninlined_format_args,
    clippy::semicolon_if_nothing_returned
)]

use std::io::Write;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use knockmer::counter::Counter;
use knockmer::hasher::RollingHasher;
use knockmer::seqstream::FileType;
use tempfile::NamedTempFile;

fn corpus(lines: usize, line_len: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(lines * (line_len + 1));
    let motif = b"ACGTACGTACGTGGCTATAG";
    for i in 0..lines {
        for j in 0..line_len {
            data.push(motif[(i + j) % motif.len()]);
        }
        data.push(b'\n');
    }
    data
}

fn bench_rolling_hasher(c: &mut Criterion) {
    let mut group = c.benchmark_group("RollingHasher::next_hash");
    let buf = corpus(1, 10_000);

    for k in [5, 8, 12, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(k), &buf, |b, buf| {
            b.iter(|| {
                let mut hasher = RollingHasher::new(k, FileType::Raw);
                hasher.set_seq(black_box(buf));
                let mut count = 0usize;
                while hasher.next_hash().is_some() {
                    count += 1;
                }
                black_box(count)
            })
        });
    }

    group.finish();
}

fn bench_counting_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("Counter::count");
    let data = corpus(2_000, 150);
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();

    for k in [5, 8, 12] {
        group.bench_with_input(BenchmarkId::from_parameter(k), &file, |b, file| {
            b.iter(|| {
                black_box(Counter::count(file.path(), FileType::Raw, k, 1).unwrap());
            })
        });
    }

    group.finish();
}

fn bench_counting_pass_parallel(c: &mut Criterion) {
    let mut group = c.benchmark_group("Counter::count (4 threads)");
    let data = corpus(2_000, 150);
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();

    for k in [5, 8, 12] {
        group.bench_with_input(BenchmarkId::from_parameter(k), &file, |b, file| {
            b.iter(|| {
                black_box(Counter::count(file.path(), FileType::Raw, k, 4).unwrap());
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_rolling_hasher,
    bench_counting_pass,
    bench_counting_pass_parallel
);
criterion_main!(benches);
