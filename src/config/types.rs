// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Defines the structure of workspace and resolved configuration,
//! supporting JSON and YAML formats.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use crate::agent::AgentConfig;
use crate::bridge::{BridgeConfig, ServerConfig};
use crate::context::ContextBudget;
use crate::providers::ModelSettings;
use crate::tools::ToolSpec;
use crate::workflow::EngineConfig;

/// Default checkpoint database, relative to the workspace root.
pub const DEFAULT_CHECKPOINT_PATH: &str = ".troupe/checkpoints.db";

/// Workspace configuration for Troupe.
/// Can be defined in .troupe.json or .troupe/config.json in the project root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    /// Language model settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelConfig>,

    /// Agent personas, one per workflow step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<AgentConfig>>,

    /// Directory of per-agent YAML/JSON files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents_dir: Option<String>,

    /// Step order, routes, and engine retry settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowConfig>,

    /// Tool registry entries by name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<HashMap<String, ToolSpec>>,

    /// Tool server launch settings by name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servers: Option<HashMap<String, ServerConfig>>,

    /// Context window budget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextConfig>,

    /// Checkpoint storage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CheckpointConfig>,

    /// Tool bridge retry and session settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<BridgeSection>,
}

/// Language model settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// Provider to use (openai, ollama, openai-compatible)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Model name to use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Custom base URL for API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Environment variable holding the API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Request timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Workflow graph and engine retry settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfig {
    /// Step names in order; defaults to the agents' order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<String>>,

    /// `{step: {status label: target step or DONE}}`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routes: Option<BTreeMap<String, BTreeMap<String, String>>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_step_retries: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_base_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_max_ms: Option<u64>,
}

/// Context window settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_messages: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,

    /// Replace trimmed history with a short summary message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summarize_dropped: Option<bool>,
}

/// Checkpoint store back-end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    Sqlite,
    Memory,
}

impl std::str::FromStr for CheckpointBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown checkpoint backend '{}'", other)),
        }
    }
}

/// Checkpoint storage settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<CheckpointBackend>,

    /// Database file; relative paths resolve against the workspace root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Checkpoints older than this are pruned, keeping each thread's latest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

/// Tool bridge settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_backoff_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_backoff_ms: Option<u64>,

    /// Tool server sessions idle this long are shut down
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,

    /// How often idle sessions are reaped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reap_interval_secs: Option<u64>,

    /// Per-attempt timeout for tools without a timeout hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout_ms: Option<u64>,
}

/// Resolved checkpoint settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCheckpoint {
    pub backend: CheckpointBackend,
    pub path: PathBuf,
    pub ttl: Option<Duration>,
}

/// Fully resolved configuration with defaults applied.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub model: ModelSettings,
    pub agents: Vec<AgentConfig>,
    pub agents_dir: Option<PathBuf>,
    pub steps: Vec<String>,
    pub routes: BTreeMap<String, BTreeMap<String, String>>,
    pub engine: EngineConfig,
    pub tools: HashMap<String, ToolSpec>,
    pub servers: HashMap<String, ServerConfig>,
    pub context: ContextBudget,
    pub summarize_dropped: bool,
    pub checkpoint: ResolvedCheckpoint,
    pub bridge: BridgeConfig,
    pub reap_interval: Duration,
}

impl ResolvedConfig {
    /// Workflow steps, defaulting to the agents in declaration order.
    pub fn workflow_steps(&self) -> Vec<String> {
        if self.steps.is_empty() {
            self.agents.iter().map(|a| a.name.clone()).collect()
        } else {
            self.steps.clone()
        }
    }

    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            model: ModelSettings::default(),
            agents: Vec::new(),
            agents_dir: None,
            steps: Vec::new(),
            routes: BTreeMap::new(),
            engine: EngineConfig::default(),
            tools: HashMap::new(),
            servers: HashMap::new(),
            context: ContextBudget::default(),
            summarize_dropped: false,
            checkpoint: ResolvedCheckpoint {
                backend: CheckpointBackend::default(),
                path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
                ttl: None,
            },
            bridge: BridgeConfig::default(),
            reap_interval: Duration::from_secs(60),
        }
    }
}
