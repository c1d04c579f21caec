// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Span helpers for consistent instrumentation.

use std::sync::Arc;
use std::time::Instant;
use tracing::{info_span, Span};

use super::metrics::RunMetrics;
use crate::types::StrategyKind;

/// RAII-style timer for one bridged tool call.
///
/// Records duration, serving strategy, and outcome into the run's metrics.
pub struct ToolSpan {
    tool_name: String,
    start: Instant,
    span: Span,
    metrics: Option<Arc<RunMetrics>>,
}

impl ToolSpan {
    /// Start a new tool span.
    pub fn start(tool_name: &str, metrics: Option<Arc<RunMetrics>>) -> Self {
        let span = info_span!(
            "tool",
            tool = %tool_name,
            strategy = tracing::field::Empty,
            attempts = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
            success = tracing::field::Empty,
        );

        Self {
            tool_name: tool_name.to_string(),
            start: Instant::now(),
            span,
            metrics,
        }
    }

    /// Get the underlying tracing span.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Note the number of attempts made.
    pub fn record_attempts(&self, attempts: u32) {
        self.span.record("attempts", attempts);
    }

    /// Note a retry in the run metrics.
    pub fn record_retry(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_tool_retry(&self.tool_name);
        }
    }

    /// Finish the span.
    pub fn finish(self, strategy: Option<StrategyKind>, success: bool) {
        let duration = self.start.elapsed();

        self.span
            .record("duration_ms", duration.as_secs_f64() * 1000.0);
        self.span.record("success", success);
        if let Some(strategy) = strategy {
            self.span.record("strategy", strategy.as_str());
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_tool(&self.tool_name, strategy, duration, success);
        }

        tracing::debug!(parent: &self.span, "Tool call complete");
    }
}
