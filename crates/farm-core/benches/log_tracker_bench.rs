//! Criterion benchmarks for the per-process log history.
//!
//! Output readers append on every line a worker prints, so `append` sits on
//! the hot path of noisy workers.  `snapshot` runs per status-page request.
//!
//! Run with:
//! ```bash
//! cargo bench --package farm-core --bench log_tracker_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use farm_core::LogTracker;

fn filled_tracker(capacity: usize) -> LogTracker {
    let tracker = LogTracker::new(capacity);
    for i in 0..capacity {
        tracker.append("bridge", format!("{{\"level\":\"info\",\"seq\":{i}}}"));
    }
    tracker
}

// ── Benchmarks: append ────────────────────────────────────────────────────────

/// Appends into a full buffer, so every call also evicts.
fn bench_append_full_buffer(c: &mut Criterion) {
    let tracker = filled_tracker(200);
    c.bench_function("append/full_200", |b| {
        b.iter(|| tracker.append(black_box("bridge"), black_box("device heartbeat ok")))
    });
}

/// Appends spread across several process names.
fn bench_append_many_processes(c: &mut Criterion) {
    let tracker = LogTracker::new(200);
    let names = ["bridge", "mirror", "provider", "trigger"];
    let mut i = 0usize;
    c.bench_function("append/four_processes", |b| {
        b.iter(|| {
            i = i.wrapping_add(1);
            tracker.append(black_box(names[i % names.len()]), black_box("line"))
        })
    });
}

// ── Benchmarks: snapshot ──────────────────────────────────────────────────────

/// Snapshot cost scales with capacity since it copies the whole buffer.
fn bench_snapshot_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");
    for &capacity in &[50usize, 200, 1000] {
        let tracker = filled_tracker(capacity);
        group.bench_with_input(BenchmarkId::new("capacity", capacity), &tracker, |b, t| {
            b.iter(|| t.snapshot(black_box("bridge")))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_append_full_buffer,
    bench_append_many_processes,
    bench_snapshot_scaling
);
criterion_main!(benches);
