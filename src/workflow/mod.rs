// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Multi-step workflow execution.
//!
//! A workflow is a fixed, forward-only graph of named steps. The
//! [`WorkflowEngine`] runs one thread's state through it, checkpointing at
//! every step boundary and pausing when a step needs clarification.

mod engine;
mod graph;
mod state;

pub use engine::{
    EngineConfig, Outcome, RunReport, StepContext, StepExecutor, WorkflowEngine,
    WorkflowEngineBuilder,
};
pub use graph::{WorkflowGraph, DONE};
pub use state::{
    ClarificationAnswer, FailureRecord, NodeState, WorkflowState, WorkflowStatus,
    CLARIFICATIONS_FIELD,
};
