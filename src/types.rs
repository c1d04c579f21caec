// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types shared across the workflow engine, agent steps, and tool bridge.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ErrorKind, ProviderError};

/// Role of a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallMeta {
    /// Identifier pairing the request with its result message.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Arguments as produced by the model.
    #[serde(default)]
    pub arguments: Value,
}

/// A message in the workflow history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Tool calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallMeta>,
    /// For tool messages, the id of the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant message that requests tool calls.
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCallMeta>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Create a tool result message answering `call_id`.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

/// Which mechanism executes a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// In-process handler.
    Native,
    /// Local command-line executable.
    Cli,
    /// Long-lived tool server over stdio.
    Protocol,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Cli => "cli",
            Self::Protocol => "protocol",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request from an agent step to run a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Value,
    /// Force a specific strategy instead of registry order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_strategy: Option<StrategyKind>,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
            requested_strategy: None,
        }
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.requested_strategy = Some(strategy);
        self
    }
}

/// Normalized outcome of a tool call, whichever strategy ran it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolCallResult {
    Ok {
        payload: Value,
    },
    Err {
        error_kind: ErrorKind,
        message: String,
        retryable: bool,
    },
}

impl ToolCallResult {
    pub fn ok(payload: Value) -> Self {
        Self::Ok { payload }
    }

    /// Error whose retryability follows its kind.
    pub fn err(error_kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Err {
            error_kind,
            message: message.into(),
            retryable: error_kind.is_retryable(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Ok { payload } => Some(payload),
            Self::Err { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Ok { .. } => None,
            Self::Err { error_kind, .. } => Some(*error_kind),
        }
    }

    /// Text suitable for a tool result message.
    pub fn to_message_text(&self) -> String {
        match self {
            Self::Ok { payload } => match payload {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            Self::Err {
                error_kind,
                message,
                ..
            } => format!("error ({}): {}", error_kind, message),
        }
    }
}

/// What a step produced when it completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    /// Final assistant text.
    pub content: String,
    /// Named fields to merge into workflow state.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Routing label consulted by conditional edges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Result of one agent step invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AgentStepResult {
    Completed {
        output: StepOutput,
        consumed_tokens: u64,
    },
    NeedsClarification {
        questions: Vec<String>,
    },
    Failed {
        error_kind: ErrorKind,
        message: String,
    },
}

impl AgentStepResult {
    pub fn failed(error_kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed {
            error_kind,
            message: message.into(),
        }
    }

    /// Short tag used in logs and edge lookup.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::NeedsClarification { .. } => "needs_clarification",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Tool description offered to the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the parameters.
    pub parameters: Value,
}

/// Token usage for a model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A language model's reply to one completion request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub tool_calls: Vec<ToolCallMeta>,
    pub usage: TokenUsage,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// The opaque "produce next message" collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produce the next assistant message for the given history.
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ModelReply, ProviderError>;
}
