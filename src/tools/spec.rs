// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Declarative tool descriptions.
//!
//! A tool lists the tiers it can be served by. The bridge tries them in the
//! fixed order native, CLI, protocol; the first available tier is primary and
//! the rest form the fallback chain.
//!
//! ```json
//! {
//!   "search_code": {
//!     "description": "Search the repository",
//!     "cli": { "command": "rg", "args": ["--json", "{query}"], "output": "lines" },
//!     "protocol": { "server": "github", "operation": "search_code" },
//!     "hints": { "phrasing": ["imperative", "natural_language"], "timeoutMs": 20000 }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// How CLI stdout is parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// A single JSON document.
    #[default]
    Json,
    /// One JSON value per non-empty line, falling back to plain strings.
    Lines,
    /// Raw text.
    Text,
}

/// Subprocess invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliSpec {
    pub command: String,
    /// Arguments; `{name}` is replaced by the string form of parameter `name`.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub output: OutputFormat,
    /// Write the parameters as JSON to stdin.
    #[serde(default)]
    pub stdin_json: bool,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// Call through a long-lived tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolSpec {
    /// Key into the configured servers.
    pub server: String,
    /// Operation name; defaults to the tool name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// How an operation is phrased in a protocol request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phrasing {
    /// The operation identifier as-is, e.g. `search_code`.
    Imperative,
    /// The operation as words followed by its arguments,
    /// e.g. `search code with query=retry`.
    NaturalLanguage,
}

impl Phrasing {
    /// Render `operation` for the wire.
    pub fn render(&self, operation: &str, parameters: &Value) -> String {
        match self {
            Self::Imperative => operation.to_string(),
            Self::NaturalLanguage => {
                let words = operation.replace(['_', '-'], " ");
                let args = describe_parameters(parameters);
                if args.is_empty() {
                    words
                } else {
                    format!("{} with {}", words, args)
                }
            }
        }
    }
}

fn describe_parameters(parameters: &Value) -> String {
    match parameters {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{}={}", k, s),
                other => format!("{}={}", k, other),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Per-tool calibration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationHints {
    /// Phrasings to try in order before the default phrasing.
    #[serde(default)]
    pub phrasing: Vec<Phrasing>,
    /// Per-attempt timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Overrides the bridge's retry cap for this tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// Registry entry for one tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    #[serde(default)]
    pub description: String,
    /// JSON schema for the parameters.
    #[serde(default = "default_parameters")]
    pub parameters: Value,
    /// Served by an in-process handler registered under the same name.
    #[serde(default)]
    pub native: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli: Option<CliSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<ProtocolSpec>,
    #[serde(default)]
    pub hints: CalibrationHints,
}

fn default_parameters() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolSpec {
    /// A tool served only by a native handler.
    pub fn native(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            parameters: default_parameters(),
            native: true,
            ..Default::default()
        }
    }

    /// A tool served only by a subprocess.
    pub fn cli(description: impl Into<String>, cli: CliSpec) -> Self {
        Self {
            description: description.into(),
            parameters: default_parameters(),
            cli: Some(cli),
            ..Default::default()
        }
    }

    /// A tool served only by a tool server.
    pub fn protocol(description: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            parameters: default_parameters(),
            protocol: Some(ProtocolSpec {
                server: server.into(),
                operation: None,
            }),
            ..Default::default()
        }
    }

    pub fn with_hints(mut self, hints: CalibrationHints) -> Self {
        self.hints = hints;
        self
    }
}

impl CliSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            output: OutputFormat::Json,
            stdin_json: false,
            env: HashMap::new(),
            cwd: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }
}
