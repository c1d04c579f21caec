// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in various locations.

use std::path::{Path, PathBuf};

use crate::agent::AgentConfig;
use crate::error::ConfigError;

use super::types::WorkspaceConfig;

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[".troupe.json", ".troupe/config.json", "troupe.config.json"];

/// Local config file name (for per-directory overrides).
pub const LOCAL_CONFIG_FILE: &str = ".troupe.local.json";

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".troupe";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.json";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Load global configuration from ~/.troupe/config.json.
pub fn load_global_config() -> Result<Option<WorkspaceConfig>, ConfigError> {
    let path = match get_global_config_path() {
        Some(p) => p,
        None => return Ok(None),
    };

    if !path.exists() {
        return Ok(None);
    }

    load_config_file(&path).map(Some)
}

/// Load workspace configuration from the workspace root.
///
/// Searches for config files in the following order:
/// 1. .troupe.json
/// 2. .troupe/config.json
/// 3. troupe.config.json
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    for filename in CONFIG_FILES {
        let path = workspace_root.join(filename);
        if path.exists() {
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load local configuration from .troupe.local.json.
pub fn load_local_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    let path = workspace_root.join(LOCAL_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    load_config_file(&path).map(Some)
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_lowercase().as_str(), "yaml" | "yml"))
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<WorkspaceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    if is_yaml(path) {
        serde_yaml::from_str(&content).map_err(ConfigError::from)
    } else {
        serde_json::from_str(&content).map_err(ConfigError::from)
    }
}

/// Load one agent definition (JSON or YAML).
pub fn load_agent_file(path: &Path) -> Result<AgentConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    if is_yaml(path) {
        serde_yaml::from_str(&content).map_err(ConfigError::from)
    } else {
        serde_json::from_str(&content).map_err(ConfigError::from)
    }
}

/// Load every `*.json`, `*.yaml`, and `*.yml` agent file in `dir`, sorted by
/// file name.
pub fn load_agents_dir(dir: &Path) -> Result<Vec<AgentConfig>, ConfigError> {
    if !dir.is_dir() {
        return Err(ConfigError::NotFound(dir.display().to_string()));
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| matches!(e, "json" | "yaml" | "yml"))
        })
        .collect();
    paths.sort();

    let mut agents = Vec::with_capacity(paths.len());
    for path in paths {
        let agent = load_agent_file(&path).map_err(|e| {
            ConfigError::InvalidFormat(format!("{}: {}", path.display(), e))
        })?;
        tracing::debug!(agent = %agent.name, path = %path.display(), "Loaded agent definition");
        agents.push(agent);
    }
    Ok(agents)
}

/// Save workspace configuration to a file.
pub fn save_workspace_config(
    workspace_root: &Path,
    config: &WorkspaceConfig,
    filename: Option<&str>,
) -> Result<PathBuf, ConfigError> {
    let filename = filename.unwrap_or(".troupe.json");
    let path = workspace_root.join(filename);

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, content)?;

    Ok(path)
}

/// Initialize a new config file with default or provided configuration.
pub fn init_config(
    workspace_root: &Path,
    config: Option<WorkspaceConfig>,
) -> Result<PathBuf, ConfigError> {
    let config = config.unwrap_or_else(get_example_config);
    save_workspace_config(workspace_root, &config, None)
}

/// Find the workspace root by searching for config files.
///
/// Walks up the directory tree from `start` until it finds a directory
/// containing a config file or reaches the filesystem root.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        for filename in CONFIG_FILES {
            if current.join(filename).exists() {
                return Some(current);
            }
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Get an example configuration: a research-then-write workflow.
pub fn get_example_config() -> WorkspaceConfig {
    use super::types::{ModelConfig, WorkflowConfig};
    use crate::clarification::InquiryPattern;

    WorkspaceConfig {
        model: Some(ModelConfig {
            provider: Some("ollama".to_string()),
            name: Some("llama3.2".to_string()),
            ..Default::default()
        }),
        agents: Some(vec![
            AgentConfig::new(
                "research",
                "You research codebases and report concrete findings.",
            )
            .with_inquiry(InquiryPattern::new(
                "scope",
                ["scope", "directory", "module", "crate", "file"],
                "What scope to analyze?",
            ))
            .with_output_fields(["findings"]),
            AgentConfig::new("write", "You turn research findings into a concise summary.")
                .with_output_fields(["summary"]),
        ]),
        workflow: Some(WorkflowConfig {
            steps: Some(vec!["research".to_string(), "write".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_files_order() {
        assert_eq!(CONFIG_FILES.len(), 3);
        assert_eq!(CONFIG_FILES[0], ".troupe.json");
    }

    #[test]
    fn test_global_config_dir() {
        let dir = get_global_config_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with(".troupe"));
    }

    #[test]
    fn test_load_workspace_config_not_found() {
        let temp = TempDir::new().unwrap();
        let result = load_workspace_config(temp.path());
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_load_workspace_config_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".troupe.json"),
            r#"{"model": {"provider": "openai", "name": "gpt-4o"}}"#,
        )
        .unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        let model = config.model.unwrap();
        assert_eq!(model.provider, Some("openai".to_string()));
        assert_eq!(model.name, Some("gpt-4o".to_string()));
    }

    #[test]
    fn test_load_config_file_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("troupe.yaml");
        std::fs::write(&path, "model:\n  provider: ollama\n  name: llama3.2\n").unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.model.unwrap().provider, Some("ollama".to_string()));
    }

    #[test]
    fn test_load_config_file_invalid_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".troupe.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config_file(&path), Err(ConfigError::JsonError(_))));
    }

    #[test]
    fn test_load_agents_dir() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("b_write.yaml"),
            "name: write\nrole: You write.\n",
        )
        .unwrap();
        std::fs::write(
            temp.path().join("a_research.json"),
            r#"{"name": "research", "role": "You research.", "outputFields": ["findings"]}"#,
        )
        .unwrap();
        std::fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        let agents = load_agents_dir(temp.path()).unwrap();
        let names: Vec<&str> = agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["research", "write"]);
        assert_eq!(agents[0].output_fields, vec!["findings"]);
    }

    #[test]
    fn test_load_agents_dir_missing() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            load_agents_dir(&temp.path().join("nope")),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_save_and_init_config() {
        let temp = TempDir::new().unwrap();
        let path = init_config(temp.path(), None).unwrap();
        assert_eq!(path.file_name().unwrap(), ".troupe.json");

        let loaded = load_config_file(&path).unwrap();
        assert_eq!(loaded, get_example_config());
    }

    #[test]
    fn test_find_workspace_root() {
        let temp = TempDir::new().unwrap();
        let subdir = temp.path().join("a").join("b").join("c");
        std::fs::create_dir_all(&subdir).unwrap();
        std::fs::write(temp.path().join(".troupe.json"), "{}").unwrap();

        assert_eq!(find_workspace_root(&subdir).unwrap(), temp.path());
    }

    #[test]
    fn test_find_workspace_root_not_found() {
        let temp = TempDir::new().unwrap();
        assert!(find_workspace_root(temp.path()).is_none());
    }
}
