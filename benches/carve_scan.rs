use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use layerfs::{CancellationToken, CarveConfig, SignatureCarver};
use rand::{Rng, SeedableRng};
use std::io::Cursor;

/// Random image with a JPEG header every `spacing` bytes
fn image(len: usize, spacing: usize) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let mut data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
    let header = b"\xff\xd8\xff\xe0\x00\x10JFIF\x00";
    let mut at = spacing;
    while at + header.len() < len {
        data[at..at + header.len()].copy_from_slice(header);
        at += spacing;
    }
    data
}

/// Benchmark full-signature scans over random data
fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("carve_scan");
    group.sample_size(10);

    let data = image(32 * 1024 * 1024, 1024 * 1024);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for window_size in [1024 * 1024, 10 * 1024 * 1024] {
        let carver = SignatureCarver::with_defaults(&CarveConfig {
            window_size,
            overlap: 100,
        })
        .unwrap();

        group.bench_with_input(
            BenchmarkId::from_parameter(window_size),
            &carver,
            |b, carver| {
                b.iter(|| {
                    let hits = carver
                        .scan(Cursor::new(data.as_slice()), CancellationToken::new())
                        .filter_map(Result::ok)
                        .count();
                    black_box(hits);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark a scan restricted to one signature
fn bench_scan_filtered(c: &mut Criterion) {
    let mut group = c.benchmark_group("carve_scan_filtered");
    group.sample_size(10);

    let data = image(32 * 1024 * 1024, 1024 * 1024);
    group.throughput(Throughput::Bytes(data.len() as u64));

    let carver = SignatureCarver::with_defaults(&CarveConfig::default())
        .unwrap()
        .with_extensions(&["jpg"]);
    group.bench_function("jpg", |b| {
        b.iter(|| {
            let hits = carver
                .scan(Cursor::new(data.as_slice()), CancellationToken::new())
                .filter_map(Result::ok)
                .count();
            black_box(hits);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_scan, bench_scan_filtered);
criterion_main!(benches);
