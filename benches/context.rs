// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for context trimming.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use troupe::context::{ContextBudget, ContextManager};
use troupe::types::ToolCallMeta;
use troupe::Message;

fn conversation(count: usize) -> Vec<Message> {
    let mut messages = vec![Message::system("You are a research agent.")];
    for i in 0..count {
        match i % 4 {
            0 => messages.push(Message::user(format!("User message {}", i))),
            1 => messages.push(Message::assistant_with_calls(
                "",
                vec![ToolCallMeta {
                    id: format!("call_{}", i),
                    name: "grep".to_string(),
                    arguments: serde_json::json!({"pattern": "retry"}),
                }],
            )),
            2 => messages.push(Message::tool_result(
                format!("call_{}", i - 1),
                "src/bridge/retry.rs:12: fn delay".repeat(4),
            )),
            _ => messages.push(Message::assistant(format!("Assistant response {}", i))),
        }
    }
    messages
}

/// Benchmark trimming by message count.
fn bench_trim_by_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("context/trim_by_count");
    let manager = ContextManager::new();

    for count in [20, 100, 500, 2000] {
        let messages = conversation(count);
        group.bench_with_input(BenchmarkId::new("trim", count), &messages, |b, messages| {
            b.iter(|| manager.trim(black_box(messages), 15, u64::MAX));
        });
    }

    group.finish();
}

/// Benchmark trimming against a tight token budget.
fn bench_trim_by_tokens(c: &mut Criterion) {
    let mut group = c.benchmark_group("context/trim_by_tokens");
    let budget = ContextBudget {
        max_messages: 10_000,
        max_tokens: 2_000,
    };

    for count in [100, 500, 2000] {
        let messages = conversation(count);
        group.bench_with_input(BenchmarkId::new("fit", count), &messages, |b, messages| {
            let manager = ContextManager::new();
            b.iter(|| manager.fit(black_box(messages), &budget));
        });
        group.bench_with_input(
            BenchmarkId::new("fit_with_summary", count),
            &messages,
            |b, messages| {
                let manager = ContextManager::new().with_summaries(true);
                b.iter(|| manager.fit(black_box(messages), &budget));
            },
        );
    }

    group.finish();
}

/// Benchmark utilization measurement.
fn bench_utilization(c: &mut Criterion) {
    let manager = ContextManager::new();
    let messages = conversation(500);

    c.bench_function("context/assess/500", |b| {
        b.iter(|| manager.assess(black_box(&messages), 8_000));
    });
}

criterion_group!(
    benches,
    bench_trim_by_count,
    bench_trim_by_tokens,
    bench_utilization,
);

criterion_main!(benches);
