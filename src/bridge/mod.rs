// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool invocation bridge.
//!
//! The bridge turns a [`ToolCall`] into a [`ToolCallResult`]. Strategy
//! selection comes from the [`ToolRegistry`]: native handler first, then CLI
//! subprocess, then a cached tool server session. Whatever runs the call, the
//! caller only ever sees the normalized result.
//!
//! # Retries and fallback
//!
//! Retryable failures (transport, timeout, tool-internal) are retried up to
//! the configured cap with jittered exponential backoff. When a tier still
//! fails with a transport error, the next declared tier is tried with the same
//! policy. Errors surfaced after this loop carry `retryable = false`.
//!
//! # Phrasing
//!
//! For tool servers, a rejected operation (`invalid_input` from the server)
//! is re-sent with each phrasing hint in turn, then with the bare operation
//! name, before the rejection counts as a failure.

pub mod cli;
pub mod pool;
pub mod retry;
pub mod session;

pub use pool::SessionPool;
pub use retry::RetryPolicy;
pub use session::{ServerConfig, ServerRequest, SessionHandle};

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::{BridgeError, ErrorKind};
use crate::telemetry::{RunMetrics, ToolSpan};
use crate::tools::{CalibrationHints, ProtocolSpec, Strategy, ToolRegistry, DEFAULT_TIMEOUT_MS};
use crate::types::{StrategyKind, ToolCall, ToolCallResult, ToolDefinition};

/// Bridge tuning.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Automatic retries for retryable failures.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Sessions idle this long are shut down.
    pub idle_timeout: Duration,
    /// Per-attempt timeout for native and CLI calls without a hint.
    pub default_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(300),
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Per-call context from the running workflow.
#[derive(Clone, Default)]
pub struct CallScope {
    /// Flips to `true` when the workflow is cancelled.
    pub cancel: Option<watch::Receiver<bool>>,
    pub metrics: Option<Arc<RunMetrics>>,
}

impl CallScope {
    pub fn new(cancel: watch::Receiver<bool>, metrics: Arc<RunMetrics>) -> Self {
        Self {
            cancel: Some(cancel),
            metrics: Some(metrics),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

/// Resolves once the scope is cancelled; never if it has no signal.
pub(crate) async fn cancelled(cancel: Option<watch::Receiver<bool>>) {
    if let Some(mut rx) = cancel {
        if rx.wait_for(|flag| *flag).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

/// Runtime dispatcher for tool calls.
pub struct ToolBridge {
    registry: Arc<ToolRegistry>,
    pool: Arc<SessionPool>,
    config: BridgeConfig,
}

impl ToolBridge {
    pub fn new(
        registry: Arc<ToolRegistry>,
        servers: HashMap<String, ServerConfig>,
        config: BridgeConfig,
    ) -> Self {
        let pool = Arc::new(SessionPool::new(servers, config.idle_timeout));
        Self {
            registry,
            pool,
            config,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Tool definitions to offer a model, in the order given.
    pub fn definitions(&self, names: &[String]) -> Vec<ToolDefinition> {
        self.registry.definitions(names)
    }

    /// Invoke a tool by name with default scope.
    pub async fn invoke(&self, tool_name: &str, parameters: Value) -> ToolCallResult {
        self.invoke_call(&ToolCall::new(tool_name, parameters), &CallScope::default())
            .await
    }

    /// Invoke a tool call within a workflow scope.
    pub async fn invoke_call(&self, call: &ToolCall, scope: &CallScope) -> ToolCallResult {
        let span = ToolSpan::start(&call.tool_name, scope.metrics.clone());
        let outcome = self
            .run_plan(call, scope, &span)
            .instrument(span.span().clone())
            .await;

        match outcome {
            Ok((strategy, payload)) => {
                span.finish(Some(strategy), true);
                ToolCallResult::ok(payload)
            }
            Err((strategy, err)) => {
                let error_kind = err.kind();
                tracing::warn!(
                    tool = %call.tool_name,
                    strategy = strategy.map(|s| s.as_str()).unwrap_or("none"),
                    kind = %error_kind,
                    error = %err,
                    "Tool call failed"
                );
                span.finish(strategy, false);
                ToolCallResult::Err {
                    error_kind,
                    message: err.to_string(),
                    retryable: false,
                }
            }
        }
    }

    async fn run_plan(
        &self,
        call: &ToolCall,
        scope: &CallScope,
        span: &ToolSpan,
    ) -> Result<(StrategyKind, Value), (Option<StrategyKind>, BridgeError)> {
        let plan = self.registry.plan(call).map_err(|e| (None, e))?;
        let hints = self
            .registry
            .get(&call.tool_name)
            .map(|spec| spec.hints.clone())
            .unwrap_or_default();
        let policy = RetryPolicy::new(
            hints.max_retries.unwrap_or(self.config.max_retries),
            self.config.base_backoff,
            self.config.max_backoff,
        );

        let tiers = plan.len();
        let mut last = None;
        for (index, strategy) in plan.iter().enumerate() {
            let kind = strategy.kind();
            match self.with_retries(call, strategy, &hints, policy, scope, span).await {
                Ok(payload) => return Ok((kind, payload)),
                Err(err) if err.kind() == ErrorKind::Transport && index + 1 < tiers => {
                    tracing::info!(
                        tool = %call.tool_name,
                        strategy = %kind,
                        error = %err,
                        "Strategy unavailable, falling back"
                    );
                    last = Some((Some(kind), err));
                }
                Err(err) => return Err((Some(kind), err)),
            }
        }

        Err(last.unwrap_or_else(|| {
            (
                None,
                BridgeError::InvalidInput(format!("tool '{}' has no strategy", call.tool_name)),
            )
        }))
    }

    async fn with_retries(
        &self,
        call: &ToolCall,
        strategy: &Strategy<'_>,
        hints: &CalibrationHints,
        policy: RetryPolicy,
        scope: &CallScope,
        span: &ToolSpan,
    ) -> Result<Value, BridgeError> {
        let mut attempt: u32 = 0;
        loop {
            if scope.is_cancelled() {
                return Err(BridgeError::Cancelled);
            }
            span.record_attempts(attempt + 1);

            let result = tokio::select! {
                result = self.attempt(call, strategy, hints) => result,
                _ = cancelled(scope.cancel.clone()) => {
                    if let Strategy::Protocol(protocol) = strategy {
                        self.pool.evict(&protocol.server).await;
                    }
                    Err(BridgeError::Cancelled)
                }
            };

            match result {
                Ok(payload) => return Ok(payload),
                Err(err) if err.kind().is_retryable() && attempt < policy.max_retries => {
                    let delay = policy.delay(attempt);
                    attempt += 1;
                    span.record_retry();
                    tracing::warn!(
                        tool = %call.tool_name,
                        strategy = %strategy.kind(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying tool call"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancelled(scope.cancel.clone()) => return Err(BridgeError::Cancelled),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(
        &self,
        call: &ToolCall,
        strategy: &Strategy<'_>,
        hints: &CalibrationHints,
    ) -> Result<Value, BridgeError> {
        let hinted = hints.timeout_ms.map(Duration::from_millis);
        match strategy {
            Strategy::Native(handler) => {
                let limit = hinted.unwrap_or(self.config.default_timeout);
                tokio::time::timeout(limit, handler.call(call.parameters.clone()))
                    .await
                    .map_err(|_| BridgeError::Timeout {
                        target: call.tool_name.clone(),
                        timeout_ms: limit.as_millis() as u64,
                    })?
            }
            Strategy::Cli(spec) => {
                let limit = hinted.unwrap_or(self.config.default_timeout);
                cli::run(spec, &call.parameters, limit).await
            }
            Strategy::Protocol(protocol) => self.call_server(call, protocol, hints, hinted).await,
        }
    }

    /// Send a call to its tool server, cycling through phrasings on rejection.
    async fn call_server(
        &self,
        call: &ToolCall,
        protocol: &ProtocolSpec,
        hints: &CalibrationHints,
        hinted: Option<Duration>,
    ) -> Result<Value, BridgeError> {
        let limit = hinted.unwrap_or_else(|| {
            self.pool
                .server_config(&protocol.server)
                .map(|server| Duration::from_millis(server.request_timeout_ms))
                .unwrap_or(self.config.default_timeout)
        });

        let operation = protocol.operation.as_deref().unwrap_or(&call.tool_name);
        let mut phrasings: Vec<String> = hints
            .phrasing
            .iter()
            .map(|phrasing| phrasing.render(operation, &call.parameters))
            .collect();
        if !phrasings.iter().any(|p| p == operation) {
            phrasings.push(operation.to_string());
        }

        let last = phrasings.len() - 1;
        for (index, phrased) in phrasings.iter().enumerate() {
            let request = ServerRequest {
                tool: &call.tool_name,
                operation: phrased,
                parameters: &call.parameters,
            };
            match self.pool.request(&protocol.server, &request, limit).await {
                Err(BridgeError::Remote {
                    kind: ErrorKind::InvalidInput,
                    message,
                }) if index < last => {
                    tracing::debug!(
                        tool = %call.tool_name,
                        operation = %phrased,
                        reason = %message,
                        "Server rejected phrasing, trying next"
                    );
                }
                other => return other,
            }
        }

        Err(BridgeError::InvalidInput(format!(
            "no phrasing accepted for '{}'",
            call.tool_name
        )))
    }

    /// Start the idle-session reaper.
    pub fn spawn_reaper(&self, every: Duration) -> JoinHandle<()> {
        self.pool.spawn_reaper(every)
    }

    /// Shut down every cached session.
    pub async fn shutdown(&self) {
        self.pool.shutdown_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{CliSpec, NativeTool, Phrasing, ToolSpec};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        calls: Arc<AtomicUsize>,
        kind: ErrorKind,
        succeed_on: usize,
    }

    #[async_trait]
    impl NativeTool for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn call(&self, parameters: Value) -> Result<Value, BridgeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on {
                Ok(json!({"attempt": n, "echo": parameters}))
            } else {
                Err(BridgeError::Remote {
                    kind: self.kind,
                    message: format!("attempt {n} failed"),
                })
            }
        }
    }

    fn fast_config() -> BridgeConfig {
        BridgeConfig {
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn flaky_bridge(kind: ErrorKind, succeed_on: usize) -> (ToolBridge, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ToolRegistry::builder()
            .spec("flaky", ToolSpec::native("Sometimes fails"))
            .native(Flaky {
                calls: Arc::clone(&calls),
                kind,
                succeed_on,
            })
            .build();
        let bridge = ToolBridge::new(Arc::new(registry), HashMap::new(), fast_config());
        (bridge, calls)
    }

    fn echo_server() -> ServerConfig {
        ServerConfig::new("sh").with_args([
            "-c",
            r#"while IFS= read -r line; do printf '{"status":"ok","result":%s}\n' "$line"; done"#,
        ])
    }

    /// Accepts only natural-language phrasing of `search_code`.
    fn picky_server() -> ServerConfig {
        ServerConfig::new("sh").with_args([
            "-c",
            r#"while IFS= read -r line; do
                 case "$line" in
                   *'"operation":"search code'*) echo '{"status":"ok","result":"found"}' ;;
                   *) echo '{"status":"error","error_detail":{"kind":"invalid_input","message":"ambiguous"}}' ;;
                 esac
               done"#,
        ])
    }

    #[tokio::test]
    async fn test_native_success_after_retries() {
        let (bridge, calls) = flaky_bridge(ErrorKind::Transport, 3);
        let metrics = Arc::new(RunMetrics::new());
        let scope = CallScope {
            cancel: None,
            metrics: Some(Arc::clone(&metrics)),
        };

        let result = bridge
            .invoke_call(&ToolCall::new("flaky", json!({"x": 1})), &scope)
            .await;
        assert_eq!(result.payload().unwrap()["attempt"], 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tools["flaky"].retries, 2);
        assert_eq!(snapshot.tools["flaky"].by_strategy["native"], 1);
    }

    #[tokio::test]
    async fn test_retry_cap_surfaces_non_retryable() {
        let (bridge, calls) = flaky_bridge(ErrorKind::Timeout, usize::MAX);
        let result = bridge.invoke("flaky", json!({})).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            ToolCallResult::Err {
                error_kind,
                retryable,
                ..
            } => {
                assert_eq!(error_kind, ErrorKind::Timeout);
                assert!(!retryable);
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_never_retried() {
        let (bridge, calls) = flaky_bridge(ErrorKind::PermissionDenied, usize::MAX);
        let result = bridge.invoke("flaky", json!({})).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.error_kind(), Some(ErrorKind::PermissionDenied));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_invalid_input() {
        let (bridge, _) = flaky_bridge(ErrorKind::Transport, 1);
        let result = bridge.invoke("missing", json!({})).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::InvalidInput));
    }

    #[tokio::test]
    async fn test_cancelled_scope() {
        let (bridge, calls) = flaky_bridge(ErrorKind::Transport, 1);
        let (tx, rx) = watch::channel(true);
        let scope = CallScope {
            cancel: Some(rx),
            metrics: None,
        };

        let result = bridge.invoke_call(&ToolCall::new("flaky", json!({})), &scope).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(tx);
    }

    #[tokio::test]
    async fn test_cli_falls_back_to_protocol() {
        let spec = ToolSpec {
            description: "Search".into(),
            cli: Some(CliSpec::new("/nonexistent/troupe-search")),
            protocol: Some(ProtocolSpec {
                server: "echo".into(),
                operation: None,
            }),
            ..Default::default()
        };
        let registry = ToolRegistry::builder().spec("search", spec).build();
        let mut servers = HashMap::new();
        servers.insert("echo".to_string(), echo_server());
        let bridge = ToolBridge::new(Arc::new(registry), servers, fast_config());

        let result = bridge.invoke("search", json!({"q": "retry"})).await;
        let payload = result.payload().unwrap();
        assert_eq!(payload["tool"], "search");
        assert_eq!(payload["parameters"]["q"], "retry");
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_phrasing_hint_fallback() {
        let spec = ToolSpec::protocol("Search code", "picky").with_hints(CalibrationHints {
            phrasing: vec![Phrasing::Imperative, Phrasing::NaturalLanguage],
            ..Default::default()
        });
        let registry = ToolRegistry::builder().spec("search_code", spec).build();
        let mut servers = HashMap::new();
        servers.insert("picky".to_string(), picky_server());
        let bridge = ToolBridge::new(Arc::new(registry), servers, fast_config());

        let result = bridge.invoke("search_code", json!({"q": "x"})).await;
        assert_eq!(result.payload(), Some(&json!("found")));
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_phrasing_exhausted_is_invalid_input() {
        let spec = ToolSpec::protocol("List issues", "picky");
        let registry = ToolRegistry::builder().spec("list_issues", spec).build();
        let mut servers = HashMap::new();
        servers.insert("picky".to_string(), picky_server());
        let bridge = ToolBridge::new(Arc::new(registry), servers, fast_config());

        let result = bridge.invoke("list_issues", json!({})).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::InvalidInput));
        bridge.shutdown().await;
    }
}
