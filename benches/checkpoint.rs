// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for checkpoint stores.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use troupe::checkpoint::{
    Checkpoint, CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore,
};
use troupe::workflow::WorkflowState;
use troupe::Message;

/// A state with `messages` turns of history.
fn state(thread: &str, messages: usize) -> WorkflowState {
    let mut state = WorkflowState::new(thread, "summarize repository X", "research");
    for i in 0..messages {
        state
            .messages
            .push(Message::assistant(format!("Finding {}: retry loop in module {}", i, i % 7)));
    }
    state
}

fn stores(temp: &TempDir) -> Vec<(&'static str, Arc<dyn CheckpointStore>)> {
    vec![
        ("memory", Arc::new(MemoryCheckpointStore::new())),
        (
            "sqlite",
            Arc::new(SqliteCheckpointStore::open(temp.path().join("bench.db")).unwrap()),
        ),
    ]
}

/// Benchmark appending checkpoints with increasing step ids.
fn bench_save(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let temp = TempDir::new().unwrap();

    let mut group = c.benchmark_group("checkpoint/save");
    group.throughput(Throughput::Elements(1));

    for (name, store) in stores(&temp) {
        for size in [10, 200] {
            let template = state(&format!("{}-{}", name, size), size);
            let step = AtomicU64::new(0);
            group.bench_with_input(BenchmarkId::new(name, size), &template, |b, template| {
                b.to_async(&rt).iter(|| {
                    let mut state = template.clone();
                    state.step_counter = step.fetch_add(1, Ordering::Relaxed) + 1;
                    let store = Arc::clone(&store);
                    async move { store.save(black_box(&Checkpoint::new(state))).await.unwrap() }
                });
            });
        }
    }

    group.finish();
}

/// Benchmark loading the latest checkpoint from a thread with history.
fn bench_load(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let temp = TempDir::new().unwrap();

    let mut group = c.benchmark_group("checkpoint/load");

    for (name, store) in stores(&temp) {
        rt.block_on(async {
            for step in 1..=100 {
                let mut state = state("history", 50);
                state.step_counter = step;
                store.save(&Checkpoint::new(state)).await.unwrap();
            }
        });

        group.bench_function(BenchmarkId::new("latest", name), |b| {
            b.iter(|| rt.block_on(async { store.load(black_box("history")).await.unwrap() }));
        });
        group.bench_function(BenchmarkId::new("list", name), |b| {
            b.iter(|| rt.block_on(async { store.list(black_box("history")).await.unwrap() }));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_save, bench_load);

criterion_main!(benches);
