// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent configuration.

use serde::{Deserialize, Serialize};

use crate::clarification::InquiryPattern;
use crate::context::ContextBudget;

/// Default cap on model/tool rounds within one step.
pub const DEFAULT_MAX_ROUNDS: u32 = 8;

fn default_max_rounds() -> u32 {
    DEFAULT_MAX_ROUNDS
}

/// Declarative description of one agent persona.
///
/// Loaded once at startup and shared read-only by the step that runs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Unique name; also the workflow step name.
    pub name: String,
    /// Role text sent as the system prompt.
    pub role: String,
    /// Questions to settle before the agent starts, in order.
    #[serde(default)]
    pub inquiry_patterns: Vec<InquiryPattern>,
    /// Fields the agent may write into workflow state.
    #[serde(default)]
    pub output_fields: Vec<String>,
    /// Tools the agent may call.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Overrides the workspace context budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextBudget>,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            inquiry_patterns: Vec::new(),
            output_fields: Vec::new(),
            tools: Vec::new(),
            context: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn with_inquiry(mut self, pattern: InquiryPattern) -> Self {
        self.inquiry_patterns.push(pattern);
        self
    }

    pub fn with_output_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds;
        self
    }

    /// Whether the agent may write `field`.
    pub fn permits_field(&self, field: &str) -> bool {
        self.output_fields.iter().any(|f| f == field)
    }

    /// Whether the agent may call `tool`.
    pub fn permits_tool(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }
}
