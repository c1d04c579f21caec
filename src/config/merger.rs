// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper
//! precedence, then resolving defaults and validating the result.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::providers::{ModelSettings, ProviderType};

use super::types::{
    CheckpointBackend, ModelConfig, ResolvedCheckpoint, ResolvedConfig, WorkspaceConfig,
    DEFAULT_CHECKPOINT_PATH,
};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub checkpoint_backend: Option<CheckpointBackend>,
    pub checkpoint_path: Option<String>,
    pub max_step_retries: Option<u32>,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Local config (.troupe.local.json)
/// 3. Workspace config (.troupe.json)
/// 4. Global config (~/.troupe/config.json)
/// 5. Default values
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    local: Option<WorkspaceConfig>,
    cli: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let mut merged = WorkspaceConfig::default();

    for config in [global, workspace, local].into_iter().flatten() {
        overlay(&mut merged, config);
    }

    apply_cli_options(&mut merged, &cli);
    resolve(merged)
}

/// Layer `config` over `base`. Scalars replace, maps extend, agents replace
/// by name.
fn overlay(base: &mut WorkspaceConfig, config: WorkspaceConfig) {
    if let Some(model) = config.model {
        let target = base.model.get_or_insert_with(Default::default);
        if model.provider.is_some() {
            target.provider = model.provider;
        }
        if model.name.is_some() {
            target.name = model.name;
        }
        if model.base_url.is_some() {
            target.base_url = model.base_url;
        }
        if model.api_key_env.is_some() {
            target.api_key_env = model.api_key_env;
        }
        if model.temperature.is_some() {
            target.temperature = model.temperature;
        }
        if model.max_tokens.is_some() {
            target.max_tokens = model.max_tokens;
        }
        if model.timeout_secs.is_some() {
            target.timeout_secs = model.timeout_secs;
        }
    }

    if let Some(agents) = config.agents {
        let target = base.agents.get_or_insert_with(Vec::new);
        for agent in agents {
            match target.iter_mut().find(|a| a.name == agent.name) {
                Some(existing) => *existing = agent,
                None => target.push(agent),
            }
        }
    }

    if config.agents_dir.is_some() {
        base.agents_dir = config.agents_dir;
    }

    if let Some(workflow) = config.workflow {
        let target = base.workflow.get_or_insert_with(Default::default);
        if workflow.steps.is_some() {
            target.steps = workflow.steps;
        }
        if workflow.routes.is_some() {
            target.routes = workflow.routes;
        }
        if workflow.max_step_retries.is_some() {
            target.max_step_retries = workflow.max_step_retries;
        }
        if workflow.backoff_base_ms.is_some() {
            target.backoff_base_ms = workflow.backoff_base_ms;
        }
        if workflow.backoff_max_ms.is_some() {
            target.backoff_max_ms = workflow.backoff_max_ms;
        }
    }

    if let Some(tools) = config.tools {
        base.tools.get_or_insert_with(Default::default).extend(tools);
    }

    if let Some(servers) = config.servers {
        base.servers.get_or_insert_with(Default::default).extend(servers);
    }

    if let Some(context) = config.context {
        let target = base.context.get_or_insert_with(Default::default);
        if context.max_messages.is_some() {
            target.max_messages = context.max_messages;
        }
        if context.max_tokens.is_some() {
            target.max_tokens = context.max_tokens;
        }
        if context.summarize_dropped.is_some() {
            target.summarize_dropped = context.summarize_dropped;
        }
    }

    if let Some(checkpoint) = config.checkpoint {
        let target = base.checkpoint.get_or_insert_with(Default::default);
        if checkpoint.backend.is_some() {
            target.backend = checkpoint.backend;
        }
        if checkpoint.path.is_some() {
            target.path = checkpoint.path;
        }
        if checkpoint.ttl_secs.is_some() {
            target.ttl_secs = checkpoint.ttl_secs;
        }
    }

    if let Some(bridge) = config.bridge {
        let target = base.bridge.get_or_insert_with(Default::default);
        if bridge.max_retries.is_some() {
            target.max_retries = bridge.max_retries;
        }
        if bridge.base_backoff_ms.is_some() {
            target.base_backoff_ms = bridge.base_backoff_ms;
        }
        if bridge.max_backoff_ms.is_some() {
            target.max_backoff_ms = bridge.max_backoff_ms;
        }
        if bridge.idle_timeout_secs.is_some() {
            target.idle_timeout_secs = bridge.idle_timeout_secs;
        }
        if bridge.reap_interval_secs.is_some() {
            target.reap_interval_secs = bridge.reap_interval_secs;
        }
        if bridge.default_timeout_ms.is_some() {
            target.default_timeout_ms = bridge.default_timeout_ms;
        }
    }
}

fn apply_cli_options(merged: &mut WorkspaceConfig, cli: &CliOptions) {
    if cli.provider.is_some() || cli.model.is_some() || cli.base_url.is_some() {
        let model = merged.model.get_or_insert_with(Default::default);
        if cli.provider.is_some() {
            model.provider = cli.provider.clone();
        }
        if cli.model.is_some() {
            model.name = cli.model.clone();
        }
        if cli.base_url.is_some() {
            model.base_url = cli.base_url.clone();
        }
    }

    if cli.checkpoint_backend.is_some() || cli.checkpoint_path.is_some() {
        let checkpoint = merged.checkpoint.get_or_insert_with(Default::default);
        if cli.checkpoint_backend.is_some() {
            checkpoint.backend = cli.checkpoint_backend;
        }
        if cli.checkpoint_path.is_some() {
            checkpoint.path = cli.checkpoint_path.clone();
        }
    }

    if cli.max_step_retries.is_some() {
        merged
            .workflow
            .get_or_insert_with(Default::default)
            .max_step_retries = cli.max_step_retries;
    }
}

/// Provider defaults first, then whatever the layers set explicitly.
fn resolve_model(model: Option<ModelConfig>) -> Result<ModelSettings, ConfigError> {
    let model = model.unwrap_or_default();
    let provider = match model.provider.as_deref() {
        Some(name) => name
            .parse::<ProviderType>()
            .map_err(|_| ConfigError::invalid("model.provider", format!("unknown provider '{}'", name)))?,
        None => ProviderType::default(),
    };

    let mut settings = ModelSettings::for_provider(provider);
    if let Some(name) = model.name {
        settings.model = name;
    }
    if let Some(base_url) = model.base_url {
        settings.base_url = base_url;
    }
    if let Some(var) = model.api_key_env {
        settings.api_key_env = Some(var);
    }
    settings.temperature = model.temperature;
    settings.max_tokens = model.max_tokens;
    if let Some(timeout) = model.timeout_secs {
        settings.timeout_secs = timeout;
    }
    Ok(settings)
}

/// Apply defaults to a merged workspace config.
pub fn resolve(merged: WorkspaceConfig) -> Result<ResolvedConfig, ConfigError> {
    let mut result = default_config();

    result.model = resolve_model(merged.model)?;
    result.agents = merged.agents.unwrap_or_default();
    result.agents_dir = merged.agents_dir.map(PathBuf::from);

    if let Some(workflow) = merged.workflow {
        result.steps = workflow.steps.unwrap_or_default();
        result.routes = workflow.routes.unwrap_or_default();
        if let Some(retries) = workflow.max_step_retries {
            result.engine.max_step_retries = retries;
        }
        if let Some(ms) = workflow.backoff_base_ms {
            result.engine.backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = workflow.backoff_max_ms {
            result.engine.backoff_max = Duration::from_millis(ms);
        }
    }

    result.tools = merged.tools.unwrap_or_default();
    result.servers = merged.servers.unwrap_or_default();

    if let Some(context) = merged.context {
        if let Some(max_messages) = context.max_messages {
            result.context.max_messages = max_messages;
        }
        if let Some(max_tokens) = context.max_tokens {
            result.context.max_tokens = max_tokens;
        }
        result.summarize_dropped = context.summarize_dropped.unwrap_or(false);
    }

    if let Some(checkpoint) = merged.checkpoint {
        result.checkpoint = ResolvedCheckpoint {
            backend: checkpoint.backend.unwrap_or_default(),
            path: checkpoint
                .path
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_PATH)),
            ttl: checkpoint.ttl_secs.map(Duration::from_secs),
        };
    }

    if let Some(bridge) = merged.bridge {
        if let Some(retries) = bridge.max_retries {
            result.bridge.max_retries = retries;
        }
        if let Some(ms) = bridge.base_backoff_ms {
            result.bridge.base_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = bridge.max_backoff_ms {
            result.bridge.max_backoff = Duration::from_millis(ms);
        }
        if let Some(secs) = bridge.idle_timeout_secs {
            result.bridge.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = bridge.reap_interval_secs {
            result.reap_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = bridge.default_timeout_ms {
            result.bridge.default_timeout = Duration::from_millis(ms);
        }
    }

    Ok(result)
}

/// Anchor relative paths in `config` at `workspace_root`.
pub fn anchor_paths(config: &mut ResolvedConfig, workspace_root: &Path) {
    if config.checkpoint.path.is_relative() {
        config.checkpoint.path = workspace_root.join(&config.checkpoint.path);
    }
    if let Some(dir) = &config.agents_dir {
        if dir.is_relative() {
            config.agents_dir = Some(workspace_root.join(dir));
        }
    }
}

/// Check a resolved config for values the runtime cannot work with.
pub fn validate_config(config: &ResolvedConfig) -> Result<(), ConfigError> {
    if config.context.max_messages == 0 {
        return Err(ConfigError::invalid("context.maxMessages", "must be at least 1"));
    }
    if config.context.max_tokens == 0 {
        return Err(ConfigError::invalid("context.maxTokens", "must be at least 1"));
    }
    if config.model.base_url.is_empty() {
        return Err(ConfigError::invalid("model.baseUrl", "must not be empty"));
    }
    if config.bridge.idle_timeout.is_zero() {
        return Err(ConfigError::invalid("bridge.idleTimeoutSecs", "must be positive"));
    }
    if config.reap_interval.is_zero() {
        return Err(ConfigError::invalid("bridge.reapIntervalSecs", "must be positive"));
    }
    if config.engine.backoff_base > config.engine.backoff_max {
        return Err(ConfigError::invalid(
            "workflow.backoffBaseMs",
            "must not exceed workflow.backoffMaxMs",
        ));
    }

    let mut names = HashSet::new();
    for agent in &config.agents {
        if agent.name.trim().is_empty() {
            return Err(ConfigError::MissingField("agents[].name".to_string()));
        }
        if !names.insert(agent.name.as_str()) {
            return Err(ConfigError::invalid(
                "agents",
                format!("duplicate agent '{}'", agent.name),
            ));
        }
        if agent.max_rounds == 0 {
            return Err(ConfigError::invalid(
                format!("agents.{}.maxRounds", agent.name),
                "must be at least 1",
            ));
        }
        if let Some(budget) = &agent.context {
            if budget.max_messages == 0 || budget.max_tokens == 0 {
                return Err(ConfigError::invalid(
                    format!("agents.{}.context", agent.name),
                    "budgets must be at least 1",
                ));
            }
        }
    }

    for step in config.workflow_steps() {
        if config.agent(&step).is_none() {
            return Err(ConfigError::invalid(
                "workflow.steps",
                format!("no agent defined for step '{}'", step),
            ));
        }
    }

    for (name, spec) in &config.tools {
        if !spec.native && spec.cli.is_none() && spec.protocol.is_none() {
            return Err(ConfigError::invalid(
                format!("tools.{}", name),
                "declares no strategy",
            ));
        }
        if let Some(cli) = &spec.cli {
            if cli.command.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("tools.{}.cli.command", name),
                    "must not be empty",
                ));
            }
        }
        if let Some(protocol) = &spec.protocol {
            if !config.servers.contains_key(&protocol.server) {
                return Err(ConfigError::invalid(
                    format!("tools.{}.protocol.server", name),
                    format!("unknown server '{}'", protocol.server),
                ));
            }
        }
    }

    for (name, server) in &config.servers {
        if server.command.trim().is_empty() {
            return Err(ConfigError::invalid(
                format!("servers.{}.command", name),
                "must not be empty",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::config::types::{BridgeSection, CheckpointConfig, ContextConfig, WorkflowConfig};
    use crate::tools::{CliSpec, ToolSpec};
    use std::collections::HashMap;

    fn model(provider: Option<&str>, name: Option<&str>) -> Option<ModelConfig> {
        Some(ModelConfig {
            provider: provider.map(str::to_string),
            name: name.map(str::to_string),
            ..Default::default()
        })
    }

    #[test]
    fn test_default_config() {
        let config = merge_config(None, None, None, CliOptions::default()).unwrap();
        assert_eq!(config.model.provider, ProviderType::Ollama);
        assert_eq!(config.context.max_messages, 40);
        assert_eq!(config.context.max_tokens, 8000);
        assert_eq!(config.engine.max_step_retries, 3);
        assert_eq!(config.bridge.max_retries, 2);
        assert_eq!(config.checkpoint.backend, CheckpointBackend::Sqlite);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_merge_config_precedence() {
        let global = WorkspaceConfig {
            model: model(Some("openai"), Some("global-model")),
            ..Default::default()
        };
        let workspace = WorkspaceConfig {
            model: model(None, Some("workspace-model")),
            ..Default::default()
        };
        let local = WorkspaceConfig {
            model: model(None, Some("local-model")),
            ..Default::default()
        };
        let cli = CliOptions {
            provider: Some("ollama".to_string()),
            ..Default::default()
        };

        let result = merge_config(Some(global), Some(workspace), Some(local), cli).unwrap();

        // CLI provider takes precedence
        assert_eq!(result.model.provider, ProviderType::Ollama);
        // Local model takes precedence over workspace and global
        assert_eq!(result.model.model, "local-model");
        // Base URL follows the winning provider
        assert_eq!(result.model.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_unknown_provider_is_invalid() {
        let workspace = WorkspaceConfig {
            model: model(Some("carrier-pigeon"), None),
            ..Default::default()
        };
        assert!(matches!(
            merge_config(None, Some(workspace), None, CliOptions::default()),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_agents_replace_by_name() {
        let global = WorkspaceConfig {
            agents: Some(vec![
                AgentConfig::new("research", "old role"),
                AgentConfig::new("write", "w"),
            ]),
            ..Default::default()
        };
        let workspace = WorkspaceConfig {
            agents: Some(vec![
                AgentConfig::new("research", "new role"),
                AgentConfig::new("review", "r"),
            ]),
            ..Default::default()
        };

        let result = merge_config(Some(global), Some(workspace), None, CliOptions::default()).unwrap();
        let names: Vec<&str> = result.agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["research", "write", "review"]);
        assert_eq!(result.agent("research").unwrap().role, "new role");
    }

    #[test]
    fn test_sections_merge_field_by_field() {
        let workspace = WorkspaceConfig {
            context: Some(ContextConfig {
                max_messages: Some(15),
                ..Default::default()
            }),
            bridge: Some(BridgeSection {
                max_retries: Some(5),
                ..Default::default()
            }),
            workflow: Some(WorkflowConfig {
                backoff_base_ms: Some(50),
                ..Default::default()
            }),
            ..Default::default()
        };
        let local = WorkspaceConfig {
            context: Some(ContextConfig {
                max_tokens: Some(2000),
                summarize_dropped: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let cli = CliOptions {
            max_step_retries: Some(1),
            checkpoint_backend: Some(CheckpointBackend::Memory),
            ..Default::default()
        };

        let result = merge_config(None, Some(workspace), Some(local), cli).unwrap();
        assert_eq!(result.context.max_messages, 15);
        assert_eq!(result.context.max_tokens, 2000);
        assert!(result.summarize_dropped);
        assert_eq!(result.bridge.max_retries, 5);
        assert_eq!(result.engine.backoff_base, Duration::from_millis(50));
        assert_eq!(result.engine.max_step_retries, 1);
        assert_eq!(result.checkpoint.backend, CheckpointBackend::Memory);
    }

    #[test]
    fn test_anchor_paths() {
        let workspace = WorkspaceConfig {
            checkpoint: Some(CheckpointConfig {
                path: Some("state/run.db".to_string()),
                ttl_secs: Some(60),
                ..Default::default()
            }),
            agents_dir: Some("agents".to_string()),
            ..Default::default()
        };
        let mut result = merge_config(None, Some(workspace), None, CliOptions::default()).unwrap();
        anchor_paths(&mut result, Path::new("/work"));

        assert_eq!(result.checkpoint.path, PathBuf::from("/work/state/run.db"));
        assert_eq!(result.checkpoint.ttl, Some(Duration::from_secs(60)));
        assert_eq!(result.agents_dir, Some(PathBuf::from("/work/agents")));
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let mut config = default_config();
        config.context.max_messages = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_step_without_agent() {
        let mut config = default_config();
        config.agents = vec![AgentConfig::new("research", "r")];
        config.steps = vec!["research".to_string(), "write".to_string()];
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("write"));
    }

    #[test]
    fn test_validate_rejects_duplicate_agents() {
        let mut config = default_config();
        config.agents = vec![AgentConfig::new("a", "1"), AgentConfig::new("a", "2")];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_tools() {
        let mut config = default_config();
        config.tools = HashMap::from([(
            "grep".to_string(),
            ToolSpec::cli("Search", CliSpec::new("  ")),
        )]);
        assert!(validate_config(&config).is_err());

        config.tools = HashMap::from([(
            "issues".to_string(),
            ToolSpec::protocol("List issues", "github"),
        )]);
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("unknown server"));

        config.tools = HashMap::from([("empty".to_string(), ToolSpec::default())]);
        assert!(validate_config(&config).is_err());
    }
}
