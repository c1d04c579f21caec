// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subprocess CLI strategy.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::BridgeError;
use crate::tools::{truncate_text, CliSpec, OutputFormat, MAX_STDERR_BYTES};

/// Matches `{name}` placeholders in arguments.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Substitute `{name}` placeholders with parameter values.
pub fn render_args(args: &[String], parameters: &Value) -> Result<Vec<String>, BridgeError> {
    args.iter()
        .map(|arg| {
            let mut missing = None;
            let rendered = PLACEHOLDER.replace_all(arg, |caps: &regex::Captures<'_>| {
                match parameters.get(&caps[1]) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => {
                        missing.get_or_insert_with(|| caps[1].to_string());
                        String::new()
                    }
                    Some(other) => other.to_string(),
                }
            });
            match missing {
                Some(name) => Err(BridgeError::InvalidInput(format!(
                    "missing parameter '{}'",
                    name
                ))),
                None => Ok(rendered.into_owned()),
            }
        })
        .collect()
}

/// Parse captured stdout according to the declared format.
pub fn parse_output(stdout: &str, format: OutputFormat) -> Result<Value, BridgeError> {
    match format {
        OutputFormat::Json => {
            let trimmed = stdout.trim();
            if trimmed.is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(trimmed).map_err(|e| {
                BridgeError::MalformedOutput(format!(
                    "expected JSON: {} ({})",
                    e,
                    truncate_text(trimmed, 200)
                ))
            })
        }
        OutputFormat::Lines => Ok(Value::Array(
            stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| {
                    serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string()))
                })
                .collect(),
        )),
        OutputFormat::Text => Ok(Value::String(stdout.to_string())),
    }
}

/// Run a CLI tool to completion.
///
/// The child is killed if the returned future is dropped, which is how
/// cancellation reaches it.
pub async fn run(
    spec: &CliSpec,
    parameters: &Value,
    timeout_duration: Duration,
) -> Result<Value, BridgeError> {
    let args = render_args(&spec.args, parameters)?;

    let mut cmd = Command::new(&spec.command);
    cmd.args(&args)
        .envs(&spec.env)
        .stdin(if spec.stdin_json {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    let body = if spec.stdin_json {
        Some(serde_json::to_vec(parameters).map_err(|e| BridgeError::InvalidInput(e.to_string()))?)
    } else {
        None
    };

    let mut child = cmd
        .spawn()
        .map_err(|e| BridgeError::spawn(&spec.command, &e))?;

    // Stdin is fed while stdout drains, both inside the timeout, so a tool
    // echoing a large payload cannot fill both pipes and stall.
    let stdin = child.stdin.take();
    let command = spec.command.as_str();
    let feed = async move {
        if let (Some(mut stdin), Some(body)) = (stdin, body) {
            // A tool that exits without reading stdin surfaces through its exit status.
            if let Err(e) = stdin.write_all(&body).await {
                tracing::debug!(command = %command, error = %e, "stdin write failed");
            }
        }
    };
    let exchange = async {
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        output
    };

    let output = timeout(timeout_duration, exchange)
        .await
        .map_err(|_| BridgeError::Timeout {
            target: spec.command.clone(),
            timeout_ms: timeout_duration.as_millis() as u64,
        })?
        .map_err(|e| BridgeError::channel(&spec.command, e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BridgeError::ExitStatus {
            command: spec.command.clone(),
            code: output.status.code().unwrap_or(-1),
            stderr: truncate_text(stderr.trim(), MAX_STDERR_BYTES),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_output(&stdout, spec.output)
}
