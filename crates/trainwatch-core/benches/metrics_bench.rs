//! # Metrics Benchmarks
//!
//! Performance benchmarks for the accumulate/evaluate path.
//!
//! Run with: `cargo bench -p trainwatch-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use trainwatch_core::{
    CriterionTable, Ingestor, Sequencer, Stage, StageMetrics, SubjectSession, TotalTrialsScope,
    TrialRecord,
};

/// Build a data file with a header and `rows` Go/No-Go rows.
fn synthetic_file(rows: usize) -> String {
    let mut data = String::from("correct\tincorrect\tpremature\tomission\tcwh\tiwh\tcl\til\trl\tpl\n");
    for i in 0..rows {
        let line = match i % 4 {
            0 => "1\t0\t0\t0\t0\t0\t900\t0\t400\t0\n",
            1 => "0\t1\t0\t0\t0\t0\t0\t1200\t0\t0\n",
            2 => "0\t0\t0\t0\t1\t0\t0\t0\t0\t0\n",
            _ => "0\t0\t0\t1\t0\t0\t0\t0\t0\t0\n",
        };
        data.push_str(line);
    }
    data
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_apply(c: &mut Criterion) {
    let record = TrialRecord {
        correct: 1,
        correct_latency_ms: 900,
        reward_latency_ms: 400,
        ..TrialRecord::default()
    };
    let rule = Stage::RcptViti2.count_rule();
    let table = CriterionTable::standard();

    c.bench_function("apply_and_evaluate", |b| {
        let mut metrics = StageMetrics::new();
        b.iter(|| {
            metrics.apply(black_box(&record), rule);
            black_box(table.meets(Stage::RcptViti2, &metrics))
        });
    });
}

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest_lines");
    let ingestor = Ingestor::default();

    for size in [100, 1_000, 10_000] {
        let data = synthetic_file(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| {
                let mut session = SubjectSession::new(
                    "bench",
                    Stage::RcptViti2To1,
                    Sequencer::standard(None),
                    TotalTrialsScope::Stage,
                )
                .expect("session");
                let lines = Ingestor::split_lines(data, 0, true);
                black_box(session.ingest_lines(0, &lines, &ingestor).expect("ingest"))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_apply, bench_ingest);
criterion_main!(benches);
