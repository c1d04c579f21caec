// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for Troupe.
//!
//! Handles loading, merging, and validation of configuration from multiple sources:
//! - Global config: ~/.troupe/config.json
//! - Workspace config: .troupe.json, .troupe/config.json, or troupe.config.json
//! - Local config: .troupe.local.json (gitignored, for personal overrides)
//! - CLI options: command-line arguments
//!
//! Configuration is merged with precedence (CLI > local > workspace > global > defaults).

mod loader;
mod merger;
mod types;

pub use loader::{
    find_workspace_root, get_example_config, get_global_config_dir, get_global_config_path,
    init_config, load_agent_file, load_agents_dir, load_config_file, load_global_config,
    load_local_config, load_workspace_config, save_workspace_config, CONFIG_FILES,
    GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE, LOCAL_CONFIG_FILE,
};

pub use merger::{anchor_paths, default_config, merge_config, resolve, validate_config, CliOptions};

pub use types::{
    BridgeSection, CheckpointBackend, CheckpointConfig, ContextConfig, ModelConfig,
    ResolvedCheckpoint, ResolvedConfig, WorkflowConfig, WorkspaceConfig, DEFAULT_CHECKPOINT_PATH,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load and merge all configuration sources for a workspace.
///
/// Agents from `agentsDir` are read once here; inline agents with the same
/// name take precedence. The result is validated before it is returned.
pub fn load_config(
    workspace_root: &Path,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;
    let local = load_local_config(workspace_root)?;

    let mut config = merge_config(global, workspace, local, cli_options)?;
    anchor_paths(&mut config, workspace_root);

    if let Some(dir) = config.agents_dir.clone() {
        let mut agents = load_agents_dir(&dir)?;
        for inline in std::mem::take(&mut config.agents) {
            match agents.iter_mut().find(|a| a.name == inline.name) {
                Some(existing) => *existing = inline,
                None => agents.push(inline),
            }
        }
        config.agents = agents;
    }

    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_with_no_files() {
        let temp = TempDir::new().unwrap();
        let config = load_config(temp.path(), CliOptions::default()).unwrap();
        assert!(config.checkpoint.path.starts_with(temp.path()));
    }

    #[test]
    fn test_load_config_with_workspace_config() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".troupe.json"),
            r#"{"model": {"provider": "openai-compatible", "name": "qwen", "baseUrl": "http://gpu:8000/v1"}}"#,
        )
        .unwrap();

        let config = load_config(temp.path(), CliOptions::default()).unwrap();
        assert_eq!(config.model.model, "qwen");
        assert_eq!(config.model.base_url, "http://gpu:8000/v1");
    }

    #[test]
    fn test_load_config_cli_override() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".troupe.json"),
            r#"{"model": {"name": "from-file"}}"#,
        )
        .unwrap();

        let cli = CliOptions {
            model: Some("from-cli".to_string()),
            ..Default::default()
        };
        let config = load_config(temp.path(), cli).unwrap();
        assert_eq!(config.model.model, "from-cli"); // CLI wins
    }

    #[test]
    fn test_load_config_local_overrides_workspace() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".troupe.json"),
            r#"{"context": {"maxMessages": 20, "maxTokens": 3000}}"#,
        )
        .unwrap();
        std::fs::write(
            temp.path().join(LOCAL_CONFIG_FILE),
            r#"{"context": {"maxMessages": 10}}"#,
        )
        .unwrap();

        let config = load_config(temp.path(), CliOptions::default()).unwrap();
        assert_eq!(config.context.max_messages, 10);
        assert_eq!(config.context.max_tokens, 3000);
    }

    #[test]
    fn test_load_config_with_agents_dir() {
        let temp = TempDir::new().unwrap();
        let agents = temp.path().join("agents");
        std::fs::create_dir(&agents).unwrap();
        std::fs::write(agents.join("research.yaml"), "name: research\nrole: from dir\n").unwrap();
        std::fs::write(agents.join("write.yaml"), "name: write\nrole: writer\n").unwrap();
        std::fs::write(
            temp.path().join(".troupe.json"),
            r#"{"agentsDir": "agents", "agents": [{"name": "research", "role": "inline"}]}"#,
        )
        .unwrap();

        let config = load_config(temp.path(), CliOptions::default()).unwrap();
        assert_eq!(config.workflow_steps(), vec!["research", "write"]);
        assert_eq!(config.agent("research").unwrap().role, "inline");
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".troupe.json"),
            r#"{"context": {"maxTokens": 0}}"#,
        )
        .unwrap();

        assert!(matches!(
            load_config(temp.path(), CliOptions::default()),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
