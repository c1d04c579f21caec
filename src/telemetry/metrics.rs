// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-run metrics accumulation.
//!
//! A [`RunMetrics`] is created for each workflow run and handed explicitly to
//! the steps and tool calls of that run. Nothing here is global: aggregating
//! across runs is left to whoever consumes the [`MetricsSnapshot`] returned
//! with each outcome.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::types::StrategyKind;

/// Accumulator for a single workflow run.
#[derive(Debug)]
pub struct RunMetrics {
    inner: Mutex<MetricsSnapshot>,
    started: Instant,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
            started: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsSnapshot> {
        // A panic while holding the lock leaves counters usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one step invocation and its result tag.
    pub fn record_step(&self, step: &str, tag: &str, duration: Duration) {
        let mut inner = self.lock();
        let metrics = inner.steps.entry(step.to_string()).or_default();
        metrics.invocations += 1;
        metrics.total_duration += duration;
        match tag {
            "completed" => metrics.completed += 1,
            "needs_clarification" => metrics.clarifications += 1,
            _ => metrics.failed += 1,
        }
    }

    /// Record an engine-level retry of a step.
    pub fn record_step_retry(&self, step: &str) {
        self.lock().steps.entry(step.to_string()).or_default().retries += 1;
    }

    /// Record a finished tool call.
    pub fn record_tool(
        &self,
        tool: &str,
        strategy: Option<StrategyKind>,
        duration: Duration,
        success: bool,
    ) {
        let mut inner = self.lock();
        let metrics = inner.tools.entry(tool.to_string()).or_default();
        metrics.record(duration, success);
        if let Some(strategy) = strategy {
            *metrics
                .by_strategy
                .entry(strategy.as_str().to_string())
                .or_insert(0) += 1;
        }
    }

    /// Record a bridge-level retry of a tool call.
    pub fn record_tool_retry(&self, tool: &str) {
        self.lock().tools.entry(tool.to_string()).or_default().retries += 1;
    }

    /// Record a timed internal operation such as a checkpoint write.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        self.lock()
            .operations
            .entry(name.to_string())
            .or_default()
            .record(duration);
    }

    /// Record model token usage.
    pub fn record_tokens(&self, input: u64, output: u64) {
        let mut inner = self.lock();
        inner.input_tokens += input;
        inner.output_tokens += output;
    }

    /// Record a context window utilization sample (percent).
    pub fn record_utilization(&self, percent: f64) {
        let mut inner = self.lock();
        inner.utilization_samples += 1;
        if percent > inner.peak_utilization {
            inner.peak_utilization = percent;
        }
    }

    /// Copy the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = self.lock().clone();
        snapshot.elapsed = self.started.elapsed();
        snapshot
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for one step name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StepMetrics {
    pub invocations: u64,
    pub completed: u64,
    pub clarifications: u64,
    pub failed: u64,
    pub retries: u64,
    pub total_duration: Duration,
}

/// Counters for one tool name.
#[derive(Debug, Clone, Serialize)]
pub struct ToolMetrics {
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    /// Calls per strategy that served them.
    pub by_strategy: BTreeMap<String, u64>,
    pub total_duration: Duration,
    pub max_duration: Duration,
}

impl ToolMetrics {
    fn record(&mut self, duration: Duration, success: bool) {
        self.invocations += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
    }

    /// Calculate success rate (0.0 to 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.invocations == 0 {
            1.0
        } else {
            self.successes as f64 / self.invocations as f64
        }
    }
}

impl Default for ToolMetrics {
    fn default() -> Self {
        Self {
            invocations: 0,
            successes: 0,
            failures: 0,
            retries: 0,
            by_strategy: BTreeMap::new(),
            total_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
        }
    }
}

/// Timing of an internal operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
}

impl OperationMetrics {
    fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
    }

    /// Calculate average duration.
    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.count as u32
        }
    }
}

/// Point-in-time copy of a run's counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub steps: BTreeMap<String, StepMetrics>,
    pub tools: BTreeMap<String, ToolMetrics>,
    pub operations: BTreeMap<String, OperationMetrics>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub utilization_samples: u64,
    /// Highest utilization percentage observed.
    pub peak_utilization: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Total tool invocations across all tools.
    pub fn tool_calls(&self) -> u64 {
        self.tools.values().map(|t| t.invocations).sum()
    }

    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str(&format!("Elapsed: {:.2?}\n", self.elapsed));
        report.push_str(&format!(
            "Tokens: {} input, {} output\n",
            self.input_tokens, self.output_tokens
        ));
        if self.utilization_samples > 0 {
            report.push_str(&format!(
                "Peak context utilization: {:.1}%\n",
                self.peak_utilization
            ));
        }

        for (name, step) in &self.steps {
            report.push_str(&format!(
                "  step {}: {} runs, {} completed, {} clarifications, {} failed, {} retries\n",
                name, step.invocations, step.completed, step.clarifications, step.failed, step.retries
            ));
        }

        for (name, tool) in &self.tools {
            report.push_str(&format!(
                "  tool {}: {} calls, {:.1}% success, {} retries\n",
                name,
                tool.invocations,
                tool.success_rate() * 100.0,
                tool.retries
            ));
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_counters() {
        let metrics = RunMetrics::new();
        metrics.record_step("research", "completed", Duration::from_millis(5));
        metrics.record_step("research", "needs_clarification", Duration::from_millis(1));
        metrics.record_step("research", "failed", Duration::from_millis(1));
        metrics.record_step_retry("research");

        let snapshot = metrics.snapshot();
        let step = &snapshot.steps["research"];
        assert_eq!(step.invocations, 3);
        assert_eq!(step.completed, 1);
        assert_eq!(step.clarifications, 1);
        assert_eq!(step.failed, 1);
        assert_eq!(step.retries, 1);
    }

    #[test]
    fn test_tool_counters_by_strategy() {
        let metrics = RunMetrics::new();
        metrics.record_tool("search", Some(StrategyKind::Cli), Duration::from_millis(3), true);
        metrics.record_tool("search", Some(StrategyKind::Protocol), Duration::from_millis(9), false);
        metrics.record_tool_retry("search");

        let snapshot = metrics.snapshot();
        let tool = &snapshot.tools["search"];
        assert_eq!(tool.invocations, 2);
        assert_eq!(tool.by_strategy["cli"], 1);
        assert_eq!(tool.by_strategy["protocol"], 1);
        assert_eq!(tool.max_duration, Duration::from_millis(9));
        assert!((tool.success_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(snapshot.tool_calls(), 2);
    }

    #[test]
    fn test_tokens_and_utilization() {
        let metrics = RunMetrics::new();
        metrics.record_tokens(100, 20);
        metrics.record_tokens(50, 5);
        metrics.record_utilization(40.0);
        metrics.record_utilization(91.5);
        metrics.record_utilization(60.0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.input_tokens, 150);
        assert_eq!(snapshot.output_tokens, 25);
        assert_eq!(snapshot.utilization_samples, 3);
        assert!((snapshot.peak_utilization - 91.5).abs() < f64::EPSILON);
        assert!(snapshot.format_report().contains("91.5%"));
    }

    #[test]
    fn test_operation_average() {
        let metrics = RunMetrics::new();
        metrics.record_operation("checkpoint.save", Duration::from_millis(10));
        metrics.record_operation("checkpoint.save", Duration::from_millis(30));

        let snapshot = metrics.snapshot();
        let op = &snapshot.operations["checkpoint.save"];
        assert_eq!(op.count, 2);
        assert_eq!(op.avg_duration(), Duration::from_millis(20));
    }
}
