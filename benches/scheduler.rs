//! Criterion benchmarks for the block scheduler.
//!
//! Run with:
//!   cargo bench
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use trialrig::config::ExperimentConfig;
use trialrig::scheduler::BlockScheduler;
use trialrig::trial::TrialOutcome;

/// Sample + record through the staircase preset, alternating performance so
/// blocks move both ways.
fn bench_staircase(c: &mut Criterion) {
    let experiment = match ExperimentConfig::value_staircase("bench").build() {
        Ok(e) => e,
        Err(e) => panic!("preset must build: {e}"),
    };

    let mut group = c.benchmark_group("staircase");
    for trials in [100u32, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*trials as u64));
        group.bench_with_input(BenchmarkId::new("sample_record", trials), trials, |b, &trials| {
            b.iter(|| {
                let mut s = BlockScheduler::new(&experiment.blocks, 42);
                for i in 0..trials {
                    let key = s.sample();
                    black_box(key);
                    let outcome = match i % 5 {
                        0 => TrialOutcome::Incorrect,
                        1 => TrialOutcome::Timeout,
                        _ => TrialOutcome::Correct,
                    };
                    s.record(outcome);
                }
                black_box(s.path().len())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_staircase);
criterion_main!(benches);
