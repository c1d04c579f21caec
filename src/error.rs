// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for Troupe.
//!
//! Every failure that crosses a component boundary is classified into an
//! [`ErrorKind`], which decides whether it is retried. Each subsystem keeps
//! its own `thiserror` enum with a `kind()` mapping into that taxonomy, and
//! `anyhow` is used for propagation at the application edge.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification shared by tool results, step failures, and model errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, pipe, or process-spawn failure.
    Transport,
    /// The operation did not finish in time.
    Timeout,
    /// Malformed parameters or an unknown tool.
    InvalidInput,
    /// The back-end refused the operation.
    PermissionDenied,
    /// The tool ran but reported a failure of its own.
    ToolInternal,
    /// Aborts the workflow.
    Fatal,
}

impl ErrorKind {
    /// Whether failures of this kind are retried automatically.
    ///
    /// `ToolInternal` is retryable but only up to the caller's bounded cap.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport | Self::Timeout | Self::ToolInternal)
    }

    /// Wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::InvalidInput => "invalid_input",
            Self::PermissionDenied => "permission_denied",
            Self::ToolInternal => "tool_internal",
            Self::Fatal => "fatal",
        }
    }

    /// Parse a kind reported by a tool server. Unknown names return `None`.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "transport" | "network" | "io" => Some(Self::Transport),
            "timeout" => Some(Self::Timeout),
            "invalid_input" | "invalid_params" | "bad_request" | "ambiguous" => {
                Some(Self::InvalidInput)
            }
            "permission_denied" | "forbidden" | "unauthorized" => Some(Self::PermissionDenied),
            "tool_internal" | "internal" => Some(Self::ToolInternal),
            "fatal" => Some(Self::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while talking to a language model.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("API error: {message}")]
    ApiError {
        message: String,
        status_code: Option<u16>,
    },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Response parsing error: {0}")]
    ParseError(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl ProviderError {
    /// Create an API error with status code.
    pub fn api(message: impl Into<String>, status_code: u16) -> Self {
        Self::ApiError {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited(_) | Self::NetworkError(_) => ErrorKind::Transport,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::AuthError(_) => ErrorKind::PermissionDenied,
            Self::ApiError { status_code, .. } => match status_code {
                Some(code) if *code >= 500 => ErrorKind::Transport,
                Some(401) | Some(403) => ErrorKind::PermissionDenied,
                Some(_) => ErrorKind::InvalidInput,
                None => ErrorKind::ToolInternal,
            },
            Self::ParseError(_) => ErrorKind::ToolInternal,
            Self::NotConfigured(_) => ErrorKind::Fatal,
        }
    }
}

/// Errors raised inside the tool bridge before normalization.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to spawn '{command}': {message}")]
    Spawn { command: String, message: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Channel to server '{server}' failed: {message}")]
    Channel { server: String, message: String },

    #[error("'{target}' timed out after {timeout_ms}ms")]
    Timeout { target: String, timeout_ms: u64 },

    #[error("'{command}' exited with status {code}: {stderr}")]
    ExitStatus {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Malformed output: {0}")]
    MalformedOutput(String),

    #[error("Tool reported {kind}: {message}")]
    Remote { kind: ErrorKind, message: String },

    #[error("Call cancelled")]
    Cancelled,
}

impl BridgeError {
    /// Build a spawn error, keeping permission failures distinguishable.
    pub fn spawn(command: impl Into<String>, err: &std::io::Error) -> Self {
        let command = command.into();
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            Self::PermissionDenied(format!("{}: {}", command, err))
        } else {
            Self::Spawn {
                command,
                message: err.to_string(),
            }
        }
    }

    /// Build a channel error for a tool server.
    pub fn channel(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTool(_) | Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Spawn { .. } | Self::Channel { .. } => ErrorKind::Transport,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ExitStatus { .. } | Self::MalformedOutput(_) => ErrorKind::ToolInternal,
            Self::Remote { kind, .. } => *kind,
            Self::Cancelled => ErrorKind::Fatal,
        }
    }
}

/// Errors that can occur in a checkpoint store.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint {step_id} for thread '{thread_id}' is not after latest step {latest}")]
    NonMonotonic {
        thread_id: String,
        step_id: u64,
        latest: u64,
    },

    #[error("Checkpoint {step_id} for thread '{thread_id}' failed integrity check")]
    Corrupted { thread_id: String, step_id: u64 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for CheckpointError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for CheckpointError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl ConfigError {
    /// Create an invalid value error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

/// Errors returned by the workflow engine's caller-facing API.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(String),

    #[error("Thread '{0}' already has a step executing")]
    ThreadBusy(String),

    #[error("Thread '{0}' has an unfinished workflow")]
    ThreadActive(String),

    #[error("Thread '{0}' is not paused for clarification")]
    NotPaused(String),

    #[error("No workflow found for thread '{0}'")]
    NotFound(String),

    #[error("Expected {expected} answers, got {got}")]
    InvalidAnswers { expected: usize, got: usize },

    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
