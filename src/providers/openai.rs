// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! OpenAI-compatible Chat Completions client.
//!
//! Works with OpenAI, Ollama, and any server exposing
//! `POST {base_url}/chat/completions`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
#[cfg(feature = "telemetry")]
use std::time::Instant;
use tracing::debug;

use super::ModelSettings;
use crate::error::ProviderError;
use crate::types::{
    LanguageModel, Message, ModelReply, Role, TokenUsage, ToolCallMeta, ToolDefinition,
};

/// Default OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default max tokens if not specified.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Language model reached over an OpenAI-compatible HTTP API.
pub struct OpenAiCompatModel {
    client: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: Option<f32>,
    timeout: Duration,
}

impl OpenAiCompatModel {
    /// Build a client from settings. The API key is read from the configured
    /// environment variable, if any.
    pub fn new(settings: &ModelSettings) -> Result<Self, ProviderError> {
        let api_key = match &settings.api_key_env {
            Some(var) => match std::env::var(var) {
                Ok(key) if !key.is_empty() => Some(key),
                _ if settings.require_api_key => {
                    return Err(ProviderError::NotConfigured(format!(
                        "environment variable {} is not set",
                        var
                    )))
                }
                _ => None,
            },
            None => None,
        };

        let timeout = Duration::from_secs(settings.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model: settings.model.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            max_tokens: settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: settings.temperature,
            timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, messages: &[Message], tools: &[ToolDefinition]) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: messages.iter().map(ChatMessage::from).collect(),
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.iter().map(ChatTool::from).collect())
            },
            max_tokens: Some(self.max_tokens),
            temperature: self.temperature,
        }
    }

    /// Map an HTTP error response to a provider error.
    fn handle_error_response(status_code: u16, body: &str) -> ProviderError {
        if let Ok(error) = serde_json::from_str::<ApiError>(body) {
            let message = error.error.message;
            match error.error.error_type.as_deref() {
                Some("authentication_error") | Some("invalid_api_key") => {
                    return ProviderError::AuthError(message)
                }
                Some("rate_limit_error") | Some("rate_limit_exceeded") => {
                    return ProviderError::RateLimited(message)
                }
                _ => {}
            }
            return match status_code {
                401 | 403 => ProviderError::AuthError(message),
                429 => ProviderError::RateLimited(message),
                _ => ProviderError::api(message, status_code),
            };
        }
        match status_code {
            401 | 403 => ProviderError::AuthError(body.to_string()),
            429 => ProviderError::RateLimited(body.to_string()),
            _ => ProviderError::api(body.to_string(), status_code),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatModel {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ModelReply, ProviderError> {
        let request = self.build_request(messages, tools);
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        debug!(model = %self.model, messages = messages.len(), tools = tools.len(), "Sending chat request");

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("content-type", "application/json");
        if let Some(ref api_key) = self.api_key {
            req = req.header("authorization", format!("Bearer {}", api_key));
        }

        let response = req.json(&request).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout.as_millis() as u64)
            } else {
                ProviderError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Self::handle_error_response(status.as_u16(), &error_text));
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        #[cfg(feature = "telemetry")]
        debug!(
            model = %self.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Chat request complete"
        );

        Ok(api_response.into())
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    call_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<ChatFunction>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatFunction {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    /// JSON-encoded arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatToolFunction,
}

#[derive(Debug, Serialize)]
struct ChatToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

// ============================================================================
// Type Conversions
// ============================================================================

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };

        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(
                msg.tool_calls
                    .iter()
                    .map(|call| ChatToolCall {
                        id: Some(call.id.clone()),
                        call_type: Some("function".to_string()),
                        function: Some(ChatFunction {
                            name: Some(call.name.clone()),
                            arguments: Some(call.arguments.to_string()),
                        }),
                    })
                    .collect(),
            )
        };

        // Assistant messages that only carry tool calls send no content.
        let content = if msg.content.is_empty() && tool_calls.is_some() {
            None
        } else {
            Some(msg.content.clone())
        };

        Self {
            role: role.to_string(),
            content,
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

impl From<&ToolDefinition> for ChatTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: ChatToolFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        }
    }
}

impl From<ChatResponse> for ModelReply {
    fn from(response: ChatResponse) -> Self {
        let usage = response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        let Some(choice) = response.choices.into_iter().next() else {
            return Self {
                usage,
                ..Default::default()
            };
        };

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| {
                let id = tc.id?;
                let func = tc.function?;
                let name = func.name?;
                let arguments: serde_json::Value = func
                    .arguments
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or_default();
                Some(ToolCallMeta {
                    id,
                    name,
                    arguments,
                })
            })
            .collect();

        Self {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage,
        }
    }
}
