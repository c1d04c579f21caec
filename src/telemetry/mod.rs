// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing setup and per-run metrics.
//!
//! - **Tracing**: `tracing` spans around step execution and tool dispatch,
//!   installed through [`init_telemetry`].
//! - **Metrics**: a [`RunMetrics`] accumulator scoped to one workflow run and
//!   passed explicitly to whatever needs to record into it.
//!
//! Log fields used across the crate: `thread_id`, `step`, `tool`,
//! `strategy`, `attempt`.

mod init;
pub mod metrics;
mod spans;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{MetricsSnapshot, OperationMetrics, RunMetrics, StepMetrics, ToolMetrics};
pub use spans::ToolSpan;
