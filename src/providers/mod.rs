// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Language model back-ends for agent steps.
//!
//! Every model speaks the OpenAI Chat Completions dialect, which covers
//! OpenAI itself, Ollama, and most self-hosted gateways:
//!
//! - [`OpenAiCompatModel`] - HTTP client for any compatible endpoint
//! - [`ScriptedModel`] - canned replies for tests and dry runs
//!
//! ```bash
//! # Local Ollama, no key needed
//! troupe submit -t demo "summarize repository X"
//!
//! # OpenAI
//! export OPENAI_API_KEY=sk-...
//! troupe --provider openai submit -t demo "summarize repository X"
//! ```

mod openai;
mod scripted;

pub use openai::{OpenAiCompatModel, OPENAI_BASE_URL};
pub use scripted::ScriptedModel;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ProviderError;
use crate::types::LanguageModel;

/// Default request timeout for model calls.
pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 120;

/// Supported provider types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    /// OpenAI GPT models
    OpenAi,
    /// Ollama local models
    #[default]
    Ollama,
    /// Any OpenAI-compatible API
    OpenAiCompatible,
}

impl ProviderType {
    /// Get the default model for this provider.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o",
            Self::Ollama => "llama3.2",
            Self::OpenAiCompatible => "gpt-4o",
        }
    }

    /// Get the default base URL for this provider.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => OPENAI_BASE_URL,
            Self::Ollama => "http://localhost:11434/v1",
            Self::OpenAiCompatible => OPENAI_BASE_URL,
        }
    }

    /// Environment variable holding the API key, if the provider uses one.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi | Self::OpenAiCompatible => Some("OPENAI_API_KEY"),
            Self::Ollama => None,
        }
    }

    /// Check if this provider requires an API key.
    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAi)
    }
}

/// Error type for parsing a provider type from a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseProviderTypeError;

impl std::fmt::Display for ParseProviderTypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid provider type")
    }
}

impl std::error::Error for ParseProviderTypeError {}

impl std::str::FromStr for ProviderType {
    type Err = ParseProviderTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "gpt" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            "openai-compatible" | "openai_compatible" => Ok(Self::OpenAiCompatible),
            _ => Err(ParseProviderTypeError),
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "OpenAI"),
            Self::Ollama => write!(f, "Ollama"),
            Self::OpenAiCompatible => write!(f, "OpenAI-Compatible"),
        }
    }
}

/// Fully resolved settings for one model client.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub provider: ProviderType,
    pub model: String,
    pub base_url: String,
    /// Environment variable to read the API key from.
    pub api_key_env: Option<String>,
    /// Fail at construction when the key variable is unset.
    pub require_api_key: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout_secs: u64,
}

impl ModelSettings {
    /// Defaults for `provider`.
    pub fn for_provider(provider: ProviderType) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            base_url: provider.default_base_url().to_string(),
            api_key_env: provider.api_key_env().map(str::to_string),
            require_api_key: provider.requires_api_key(),
            max_tokens: None,
            temperature: None,
            timeout_secs: DEFAULT_MODEL_TIMEOUT_SECS,
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self::for_provider(ProviderType::default())
    }
}

/// Create a model client from resolved settings.
pub fn create_model(settings: &ModelSettings) -> Result<Arc<dyn LanguageModel>, ProviderError> {
    if settings.provider == ProviderType::OpenAiCompatible && settings.base_url.is_empty() {
        return Err(ProviderError::NotConfigured(
            "base_url required for OpenAI-Compatible".to_string(),
        ));
    }
    Ok(Arc::new(OpenAiCompatModel::new(settings)?))
}
