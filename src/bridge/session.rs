// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool server sessions.
//!
//! A tool server is a long-lived subprocess speaking newline-delimited JSON
//! over stdin/stdout. Each request is one line:
//!
//! ```json
//! {"tool": "search_issues", "operation": "search_issues", "parameters": {"q": "crash"}}
//! ```
//!
//! and each response is one line:
//!
//! ```json
//! {"status": "ok", "result": {...}}
//! {"status": "error", "error_detail": {"kind": "invalid_input", "message": "..."}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::{BridgeError, ErrorKind};

/// How to launch a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Per-request timeout when the tool has no timeout hint.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl ServerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            request_timeout_ms: default_request_timeout_ms(),
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
}

/// One request line.
#[derive(Debug, Serialize)]
pub struct ServerRequest<'a> {
    pub tool: &'a str,
    pub operation: &'a str,
    pub parameters: &'a Value,
}

/// One response line.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct ServerResponse {
    status: ResponseStatus,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error_detail: Option<Value>,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum ResponseStatus {
    Ok,
    Error,
}

/// Convert an `error_detail` value into a bridge error.
///
/// Accepts `{"kind": ..., "message": ...}` or a bare string. Unknown kinds are
/// treated as tool-internal failures.
fn remote_error(detail: Option<Value>) -> BridgeError {
    let (kind, message) = match detail {
        Some(Value::String(message)) => (None, message),
        Some(Value::Object(map)) => {
            let kind = map.get("kind").and_then(Value::as_str).and_then(ErrorKind::from_wire);
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(map.clone()).to_string());
            (kind, message)
        }
        Some(other) => (None, other.to_string()),
        None => (None, "tool server reported an error".to_string()),
    };
    BridgeError::Remote {
        kind: kind.unwrap_or(ErrorKind::ToolInternal),
        message,
    }
}

/// A live connection to one tool server process.
pub struct SessionHandle {
    server: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    last_used: Instant,
    requests: u64,
    in_flight: bool,
}

impl SessionHandle {
    /// Spawn the server process.
    pub async fn spawn(server: &str, config: &ServerConfig) -> Result<Self, BridgeError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| BridgeError::spawn(&config.command, &e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::channel(server, "failed to get stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::channel(server, "failed to get stdout"))?;

        tracing::debug!(server = %server, command = %config.command, "Tool server started");

        Ok(Self {
            server: server.to_string(),
            child,
            stdin,
            stdout: BufReader::new(stdout),
            last_used: Instant::now(),
            requests: 0,
            in_flight: false,
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Number of requests sent over this session.
    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// Time since the last request finished.
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Whether the process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// False if a request was abandoned mid-exchange, leaving the channel
    /// out of step.
    pub fn is_clean(&self) -> bool {
        !self.in_flight
    }

    /// Send one request and wait for its response line.
    ///
    /// On timeout or a channel failure the session must be discarded: a late
    /// response would otherwise be read as the answer to the next request.
    pub async fn request(
        &mut self,
        request: &ServerRequest<'_>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| BridgeError::InvalidInput(e.to_string()))?;
        line.push('\n');

        let server = self.server.clone();
        self.in_flight = true;
        let exchange = async {
            self.stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| BridgeError::channel(&server, e.to_string()))?;
            self.stdin
                .flush()
                .await
                .map_err(|e| BridgeError::channel(&server, e.to_string()))?;

            let mut response = String::new();
            let read = self
                .stdout
                .read_line(&mut response)
                .await
                .map_err(|e| BridgeError::channel(&server, e.to_string()))?;
            if read == 0 {
                return Err(BridgeError::channel(&server, "server closed its output"));
            }
            Ok(response)
        };

        let outcome = tokio::time::timeout(timeout, exchange).await;
        let response = outcome.map_err(|_| BridgeError::Timeout {
            target: server.clone(),
            timeout_ms: timeout.as_millis() as u64,
        })??;

        self.in_flight = false;
        self.requests += 1;
        self.last_used = Instant::now();

        let response: ServerResponse = serde_json::from_str(response.trim()).map_err(|e| {
            BridgeError::channel(&self.server, format!("malformed response: {}", e))
        })?;

        match response.status {
            ResponseStatus::Ok => Ok(response.result),
            ResponseStatus::Error => Err(remote_error(response.error_detail)),
        }
    }

    /// Kill the server process.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(server = %self.server, error = %e, "Tool server already exited");
        }
        tracing::debug!(server = %self.server, requests = self.requests, "Tool server stopped");
    }
}
