//! Registry read/write benchmarks

use criterion::{Criterion, criterion_group, criterion_main};
use obc::records::ProcStatRecord;
use obc_shared_memory::{SegmentDef, SegmentKind, SegmentRegistry};
use std::hint::black_box;

fn bench_registry() -> (SegmentRegistry, String) {
    let name = format!("/obc_bench_{}", std::process::id());
    let registry = SegmentRegistry::new();
    registry
        .configure(vec![SegmentDef::new(&name, 4096, SegmentKind::Platform)])
        .unwrap();
    assert!(registry.initialize().is_clean());
    (registry, name)
}

/// Benchmark raw copies for different sizes
fn bench_read_write(c: &mut Criterion) {
    let (registry, name) = bench_registry();
    let h = registry.open(&name, SegmentKind::Platform).unwrap();

    let data_4 = [0xAAu8; 4];
    let data_4k = vec![0xAAu8; 4096];
    let mut out_4 = [0u8; 4];
    let mut out_4k = vec![0u8; 4096];

    c.bench_function("write_4_bytes", |b| {
        b.iter(|| registry.write(h, black_box(&data_4)).unwrap());
    });
    c.bench_function("write_4k_bytes", |b| {
        b.iter(|| registry.write(h, black_box(&data_4k)).unwrap());
    });
    c.bench_function("read_4_bytes", |b| {
        b.iter(|| {
            registry.read(h, &mut out_4).unwrap();
            black_box(out_4[0]);
        });
    });
    c.bench_function("read_4k_bytes", |b| {
        b.iter(|| {
            registry.read(h, &mut out_4k).unwrap();
            black_box(out_4k[0]);
        });
    });

    registry.close(h).unwrap();
    registry.destroy_all();
}

/// Benchmark the supervisor's per-cycle record publish
fn bench_record_publish(c: &mut Criterion) {
    let (registry, name) = bench_registry();
    let h = registry.open(&name, SegmentKind::Platform).unwrap();
    let mut record = ProcStatRecord::default();
    record.num = 16;

    c.bench_function("publish_proc_stat", |b| {
        b.iter(|| {
            record.stat[0] = record.stat[0].wrapping_add(1);
            registry.write_record(h, black_box(&record)).unwrap();
        });
    });

    c.bench_function("open_close", |b| {
        b.iter(|| {
            let extra = registry.open(&name, SegmentKind::Platform).unwrap();
            registry.close(black_box(extra)).unwrap();
        });
    });

    registry.close(h).unwrap();
    registry.destroy_all();
}

criterion_group!(benches, bench_read_write, bench_record_publish);
criterion_main!(benches);
