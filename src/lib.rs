// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Troupe - multi-agent workflow orchestration.
//!
//! A task runs through a fixed graph of agent steps. Each step may call
//! tools through a three-tier bridge, may pause the workflow to ask the
//! caller a question, and ends with a checkpoint that survives restarts.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Core type definitions (Message, ToolCall, AgentStepResult, etc.)
//! - [`error`] - Error taxonomy and per-subsystem error types
//! - [`config`] - Configuration loading and merging
//! - [`providers`] - Language model clients (OpenAI-compatible, scripted)
//! - [`telemetry`] - Tracing setup and per-run metrics
//! - [`tools`] - Tool specs and the registry
//! - [`bridge`] - Tool dispatch over native, CLI, and protocol strategies
//! - [`context`] - Context window trimming and utilization
//! - [`checkpoint`] - Checkpoint stores (SQLite, in-memory)
//! - [`clarification`] - Pre-execution inquiry
//! - [`agent`] - The parametrized agent step
//! - [`workflow`] - Step graph and execution engine
//! - [`runtime`] - Wiring from configuration to a running engine
//!
//! # Example
//!
//! ```rust,ignore
//! use troupe::config::{load_config, CliOptions};
//! use troupe::runtime::Runtime;
//!
//! let config = load_config(Path::new("."), CliOptions::default())?;
//! let runtime = Runtime::from_config(config)?;
//! let report = runtime.engine().submit("thread-1", "summarize repository X").await?;
//! ```

pub mod agent;
pub mod bridge;
pub mod checkpoint;
pub mod clarification;
pub mod config;
pub mod context;
pub mod error;
pub mod providers;
pub mod runtime;
pub mod telemetry;
pub mod tools;
pub mod types;
pub mod workflow;

// Re-export commonly used types at crate root
pub use error::{
    BridgeError, CheckpointError, ConfigError, ErrorKind, ProviderError, Result, WorkflowError,
};
pub use types::{
    AgentStepResult, LanguageModel, Message, ModelReply, Role, StepOutput, StrategyKind, ToolCall,
    ToolCallResult, ToolDefinition,
};
pub use workflow::{Outcome, RunReport, WorkflowEngine, WorkflowStatus};

/// Troupe version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let _msg = Message::user("test");
        let _call = ToolCall::new("grep", serde_json::json!({}));
        assert!(ErrorKind::Transport.is_retryable());
    }
}
