// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent steps.
//!
//! One parametrized [`AgentStep`] runs every persona; what differs between
//! a researcher and a reviewer lives in its [`AgentConfig`]. A step:
//!
//! 1. Checks its inquiry patterns and pauses if a question is unanswered.
//! 2. Sends the role prompt plus the trimmed workflow history to the model.
//! 3. Runs requested tools through the bridge and loops until the model
//!    replies without tool calls, or the round cap is hit.
//! 4. Parses the final reply into content, permitted fields, and a routing
//!    status.
//!
//! # Example
//!
//! ```rust,ignore
//! use troupe::agent::{AgentConfig, AgentStep};
//! use troupe::providers::{create_model, ModelSettings};
//!
//! let model = create_model(&ModelSettings::default())?;
//! let step = AgentStep::new(AgentConfig::new("research", "You research code."), model);
//! ```

mod types;

pub use types::{AgentConfig, DEFAULT_MAX_ROUNDS};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::bridge::ToolBridge;
use crate::clarification::{Clarification, ClarificationProtocol};
use crate::context::{ContextBudget, ContextManager};
use crate::error::ErrorKind;
use crate::types::{
    AgentStepResult, LanguageModel, Message, StepOutput, TokenUsage, ToolCall, ToolCallResult,
    ToolDefinition,
};
use crate::workflow::{StepContext, StepExecutor, WorkflowState};

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```").unwrap());

/// Runs one agent persona as a workflow step.
pub struct AgentStep {
    config: AgentConfig,
    model: Arc<dyn LanguageModel>,
    bridge: Option<Arc<ToolBridge>>,
    context: ContextManager,
    budget: ContextBudget,
    clarification: ClarificationProtocol,
}

impl AgentStep {
    pub fn new(config: AgentConfig, model: Arc<dyn LanguageModel>) -> Self {
        let clarification = ClarificationProtocol::new()
            .with_step(config.name.clone(), config.inquiry_patterns.clone());
        Self {
            budget: config.context.unwrap_or_default(),
            config,
            model,
            bridge: None,
            context: ContextManager::new(),
            clarification,
        }
    }

    pub fn with_bridge(mut self, bridge: Arc<ToolBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn with_context(mut self, context: ContextManager) -> Self {
        self.context = context;
        self
    }

    /// Budget used when the agent's own config does not set one.
    pub fn with_default_budget(mut self, budget: ContextBudget) -> Self {
        if self.config.context.is_none() {
            self.budget = budget;
        }
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn budget(&self) -> &ContextBudget {
        &self.budget
    }

    /// Role text plus what the agent should know about prior steps.
    fn system_prompt(&self, state: &WorkflowState) -> String {
        let mut prompt = self.config.role.clone();

        if !state.fields.is_empty() {
            prompt.push_str("\n\n## Known so far\n");
            for (key, value) in &state.fields {
                prompt.push_str(&format!("- {}: {}\n", key, value));
            }
        }

        if !self.config.output_fields.is_empty() {
            prompt.push_str(&format!(
                "\n\n## Output\nReply with a JSON object: {{\"content\": \"<summary>\", \"fields\": {{...}}, \"status\": \"<optional label>\"}}.\nFields you may set: {}.",
                self.config.output_fields.join(", ")
            ));
        }

        prompt
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        match &self.bridge {
            Some(bridge) if !self.config.tools.is_empty() => bridge.definitions(&self.config.tools),
            _ => Vec::new(),
        }
    }

    /// Split a final reply into content, permitted fields, and status.
    ///
    /// A JSON object (bare or in a fenced block) is read structurally;
    /// anything else is plain content.
    fn parse_output(&self, text: &str) -> StepOutput {
        let trimmed = text.trim();
        let candidate = JSON_FENCE
            .captures(trimmed)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(trimmed);

        let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) else {
            return StepOutput {
                content: text.to_string(),
                ..Default::default()
            };
        };

        let mut output = StepOutput::default();
        for (key, value) in map {
            match key.as_str() {
                "content" => {
                    output.content = match value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    }
                }
                "status" => output.status = value.as_str().map(str::to_string),
                "fields" => {
                    if let Value::Object(fields) = value {
                        for (field, value) in fields {
                            self.keep_field(&mut output, field, value);
                        }
                    }
                }
                _ => self.keep_field(&mut output, key, value),
            }
        }
        if output.content.is_empty() {
            output.content = text.to_string();
        }
        output
    }

    fn keep_field(&self, output: &mut StepOutput, field: String, value: Value) {
        if self.config.permits_field(&field) {
            output.fields.insert(field, value);
        } else {
            debug!(agent = %self.config.name, field = %field, "Dropping field not permitted for agent");
        }
    }

    async fn run_tool(&self, call: ToolCall, ctx: &StepContext) -> Result<String, AgentStepResult> {
        if !self.config.permits_tool(&call.tool_name) {
            return Err(AgentStepResult::failed(
                ErrorKind::InvalidInput,
                format!(
                    "agent '{}' may not call tool '{}'",
                    self.config.name, call.tool_name
                ),
            ));
        }
        let Some(bridge) = &self.bridge else {
            return Err(AgentStepResult::failed(
                ErrorKind::Fatal,
                format!("no tool bridge available for '{}'", call.tool_name),
            ));
        };

        match bridge.invoke_call(&call, &ctx.call_scope()).await {
            ToolCallResult::Err {
                error_kind,
                message,
                ..
            } => Err(AgentStepResult::failed(
                error_kind,
                format!("tool '{}' failed: {}", call.tool_name, message),
            )),
            ok => Ok(ok.to_message_text()),
        }
    }
}

#[async_trait]
impl StepExecutor for AgentStep {
    async fn execute(&self, state: &WorkflowState, ctx: &StepContext) -> AgentStepResult {
        if let Clarification::NeedsClarification(questions) =
            self.clarification.evaluate_state(&self.config.name, state)
        {
            return AgentStepResult::NeedsClarification { questions };
        }

        let tools = self.tool_definitions();
        let mut history = Vec::with_capacity(state.messages.len() + 1);
        history.push(Message::system(self.system_prompt(state)));
        history.extend(state.messages.iter().cloned());

        let mut usage = TokenUsage::default();

        for round in 1..=self.config.max_rounds {
            if ctx.is_cancelled() {
                return AgentStepResult::failed(ErrorKind::Fatal, "cancelled");
            }

            let window = self.context.fit(&history, &self.budget).messages;
            let utilization = self.context.assess(&window, self.budget.max_tokens);
            ctx.metrics.record_utilization(utilization.percent);

            debug!(
                agent = %self.config.name,
                round,
                messages = window.len(),
                utilization = format!("{:.1}", utilization.percent),
                "Requesting completion"
            );

            let reply = match self.model.complete(&window, &tools).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(agent = %self.config.name, error = %e, "Model call failed");
                    return AgentStepResult::failed(e.kind(), e.to_string());
                }
            };
            usage.input_tokens += reply.usage.input_tokens;
            usage.output_tokens += reply.usage.output_tokens;
            ctx.metrics
                .record_tokens(reply.usage.input_tokens, reply.usage.output_tokens);

            if reply.tool_calls.is_empty() {
                let consumed_tokens = if usage.total() > 0 {
                    usage.total()
                } else {
                    let counter = self.context.counter();
                    counter.count_all(&window) + counter.count(&Message::assistant(reply.content.clone()))
                };
                return AgentStepResult::Completed {
                    output: self.parse_output(&reply.content),
                    consumed_tokens,
                };
            }

            history.push(Message::assistant_with_calls(
                reply.content.clone(),
                reply.tool_calls.clone(),
            ));
            for meta in &reply.tool_calls {
                let call = ToolCall::new(meta.name.clone(), meta.arguments.clone());
                match self.run_tool(call, ctx).await {
                    Ok(text) => history.push(Message::tool_result(meta.id.clone(), text)),
                    Err(failed) => return failed,
                }
            }
        }

        AgentStepResult::failed(
            ErrorKind::Fatal,
            format!(
                "agent '{}' gave no final answer within {} rounds",
                self.config.name, self.config.max_rounds
            ),
        )
    }
}
