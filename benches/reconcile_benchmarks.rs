//! Reconciliation and report-writing benchmarks
//!
//! Measures the finalize-phase cost: schema discovery over heterogeneous
//! measure blocks, row alignment, and Arrow conversion of the aligned table.
//!
//! Run with: cargo bench --bench reconcile_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use trueno_xval::config::EvaluationMode;
use trueno_xval::reconcile::reconcile;
use trueno_xval::record::{KeyBlock, Measures, ResultRecord};
use trueno_xval::stats::{columns, StatsBlock};

const SIZES: [usize; 3] = [1_000, 10_000, 100_000];

/// Records whose measure blocks rotate through overlapping name sets, so the
/// schema keeps growing for the first few hundred records.
fn synthetic_records(count: usize) -> Vec<ResultRecord> {
    let mode = EvaluationMode::Classification;
    let width = columns(mode).len();
    (0..count)
        .map(|i| {
            let measures: Measures = (0..4)
                .map(|j| {
                    let name = format!("measure{}", (i + j * 7) % 32);
                    #[allow(clippy::cast_precision_loss)]
                    let value = (i * j) as f64;
                    (name, Some(value))
                })
                .collect();
            #[allow(clippy::cast_precision_loss)]
            let stats = StatsBlock::from_values(mode, (0..width).map(|c| Some(c as f64)).collect())
                .expect("classification stats width");
            ResultRecord::new(
                KeyBlock {
                    dataset: format!("dataset{}", i % 5),
                    run: u32::try_from(i / 10 % 10 + 1).unwrap_or(1),
                    fold: u32::try_from(i % 10).unwrap_or(0),
                    scheme: "knn".to_string(),
                    scheme_options: "-K 3".to_string(),
                    scheme_version: "1".to_string(),
                    timestamp: "2026-01-01T00:00:00+00:00".to_string(),
                },
                stats,
                measures,
                None,
            )
        })
        .collect()
}

/// Benchmark schema discovery plus alignment
fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");

    for size in SIZES {
        let records = synthetic_records(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("records", size), &records, |b, records| {
            b.iter(|| reconcile(black_box(records)).expect("reconcile"));
        });
    }

    group.finish();
}

/// Benchmark conversion of a reconciled table to an Arrow RecordBatch
fn bench_to_record_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("to_record_batch");

    for size in SIZES {
        let table = reconcile(&synthetic_records(size)).expect("reconcile");
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("rows", size), &table, |b, table| {
            b.iter(|| black_box(table).to_record_batch().expect("record batch"));
        });
    }

    group.finish();
}

/// Benchmark the wire-format round trip used between evaluator and collector
fn bench_wire_pairs(c: &mut Criterion) {
    let records = synthetic_records(1_000);
    let mut buffer = Vec::new();
    for record in &records {
        record.write_pair(&mut buffer).expect("write pair");
    }

    c.bench_function("read_pairs_1000", |b| {
        b.iter(|| trueno_xval::record::read_pairs(black_box(buffer.as_slice())).expect("read"));
    });
}

criterion_group!(
    benches,
    bench_reconcile,
    bench_to_record_batch,
    bench_wire_pairs
);
criterion_main!(benches);
