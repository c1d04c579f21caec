// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool registry and native handler trait.
//!
//! - [`NativeTool`] trait for in-process tool implementations
//! - [`ToolRegistry`] mapping names to [`ToolSpec`]s and native handlers
//! - [`Strategy`] plans resolved for a call

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::spec::{CliSpec, ProtocolSpec, ToolSpec};
use crate::error::BridgeError;
use crate::types::{StrategyKind, ToolCall, ToolDefinition};

/// Trait for tools served in-process.
///
/// ```rust,ignore
/// struct WordCount;
///
/// #[async_trait]
/// impl NativeTool for WordCount {
///     fn name(&self) -> &str {
///         "word_count"
///     }
///
///     async fn call(&self, parameters: Value) -> Result<Value, BridgeError> {
///         let text = parameters["text"].as_str().unwrap_or_default();
///         Ok(json!({ "words": text.split_whitespace().count() }))
///     }
/// }
/// ```
#[async_trait]
pub trait NativeTool: Send + Sync {
    /// Name the handler is registered under.
    fn name(&self) -> &str;

    /// Run the tool.
    async fn call(&self, parameters: Value) -> Result<Value, BridgeError>;
}

/// One resolved tier for a call.
#[derive(Clone)]
pub enum Strategy<'a> {
    Native(Arc<dyn NativeTool>),
    Cli(&'a CliSpec),
    Protocol(&'a ProtocolSpec),
}

impl Strategy<'_> {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Native(_) => StrategyKind::Native,
            Self::Cli(_) => StrategyKind::Cli,
            Self::Protocol(_) => StrategyKind::Protocol,
        }
    }
}

impl fmt::Debug for Strategy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(tool) => write!(f, "Native({})", tool.name()),
            Self::Cli(cli) => write!(f, "Cli({})", cli.command),
            Self::Protocol(p) => write!(f, "Protocol({})", p.server),
        }
    }
}

/// Registry of tool specs and native handlers.
///
/// Read-only after construction; share it behind an `Arc`.
pub struct ToolRegistry {
    specs: HashMap<String, ToolSpec>,
    natives: HashMap<String, Arc<dyn NativeTool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            specs: HashMap::new(),
            natives: HashMap::new(),
        }
    }

    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }

    /// Get a spec by tool name.
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.specs.get(name)
    }

    /// Check if a tool exists.
    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    /// Sorted tool names.
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.specs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Definitions for the given tools, in the order given. Unknown names are skipped.
    pub fn definitions(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| {
                self.specs.get(name).map(|spec| ToolDefinition {
                    name: name.clone(),
                    description: spec.description.clone(),
                    parameters: spec.parameters.clone(),
                })
            })
            .collect()
    }

    /// Every tier available for a tool, in selection order.
    ///
    /// A native tier counts only when a handler is registered.
    pub fn tiers(&self, name: &str) -> Result<Vec<Strategy<'_>>, BridgeError> {
        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| BridgeError::UnknownTool(name.to_string()))?;

        let mut tiers = Vec::with_capacity(3);
        if spec.native {
            match self.natives.get(name) {
                Some(handler) => tiers.push(Strategy::Native(Arc::clone(handler))),
                None => tracing::debug!(tool = %name, "Native tier declared without handler"),
            }
        }
        if let Some(cli) = &spec.cli {
            tiers.push(Strategy::Cli(cli));
        }
        if let Some(protocol) = &spec.protocol {
            tiers.push(Strategy::Protocol(protocol));
        }
        Ok(tiers)
    }

    /// Resolve the ordered strategies for a call.
    ///
    /// The first entry is the primary strategy and the rest are fallbacks.
    /// A requested strategy pins the plan to that single tier.
    pub fn plan(&self, call: &ToolCall) -> Result<Vec<Strategy<'_>>, BridgeError> {
        let tiers = self.tiers(&call.tool_name)?;

        if let Some(requested) = call.requested_strategy {
            return tiers
                .into_iter()
                .find(|tier| tier.kind() == requested)
                .map(|tier| vec![tier])
                .ok_or_else(|| {
                    BridgeError::InvalidInput(format!(
                        "tool '{}' has no {} strategy",
                        call.tool_name, requested
                    ))
                });
        }

        if tiers.is_empty() {
            return Err(BridgeError::InvalidInput(format!(
                "tool '{}' has no available strategy",
                call.tool_name
            )));
        }
        Ok(tiers)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for constructing a ToolRegistry.
pub struct ToolRegistryBuilder {
    specs: HashMap<String, ToolSpec>,
    natives: HashMap<String, Arc<dyn NativeTool>>,
}

impl ToolRegistryBuilder {
    /// Create a new empty builder.
    pub fn new() -> Self {
        Self {
            specs: HashMap::new(),
            natives: HashMap::new(),
        }
    }

    /// Add or replace a tool spec.
    pub fn spec(mut self, name: impl Into<String>, spec: ToolSpec) -> Self {
        self.specs.insert(name.into(), spec);
        self
    }

    /// Add every spec from a config map.
    pub fn specs(mut self, specs: impl IntoIterator<Item = (String, ToolSpec)>) -> Self {
        self.specs.extend(specs);
        self
    }

    /// Register a native handler under its own name.
    pub fn native<T: NativeTool + 'static>(mut self, handler: T) -> Self {
        self.natives
            .insert(handler.name().to_string(), Arc::new(handler));
        self
    }

    /// Register a shared native handler.
    pub fn native_arc(mut self, handler: Arc<dyn NativeTool>) -> Self {
        self.natives.insert(handler.name().to_string(), handler);
        self
    }

    /// Build the final registry.
    pub fn build(self) -> ToolRegistry {
        for name in self.natives.keys() {
            if !self.specs.contains_key(name) {
                tracing::warn!(tool = %name, "Native handler registered without a tool spec");
            }
        }
        ToolRegistry {
            specs: self.specs,
            natives: self.natives,
        }
    }
}

impl Default for ToolRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::spec::CliSpec;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl NativeTool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn call(&self, parameters: Value) -> Result<Value, BridgeError> {
            Ok(parameters)
        }
    }

    fn multi_tier() -> ToolSpec {
        ToolSpec {
            description: "Echo".into(),
            native: true,
            cli: Some(CliSpec::new("echo")),
            protocol: Some(ProtocolSpec {
                server: "srv".into(),
                operation: None,
            }),
            ..Default::default()
        }
    }

    fn kinds(plan: &[Strategy<'_>]) -> Vec<StrategyKind> {
        plan.iter().map(Strategy::kind).collect()
    }

    #[test]
    fn test_plan_orders_tiers() {
        let registry = ToolRegistry::builder()
            .spec("echo", multi_tier())
            .native(Echo)
            .build();

        let plan = registry.plan(&ToolCall::new("echo", json!({}))).unwrap();
        assert_eq!(
            kinds(&plan),
            vec![StrategyKind::Native, StrategyKind::Cli, StrategyKind::Protocol]
        );
    }

    #[test]
    fn test_plan_is_deterministic() {
        let registry = ToolRegistry::builder().spec("echo", multi_tier()).build();
        let call = ToolCall::new("echo", json!({}));

        let first = kinds(&registry.plan(&call).unwrap());
        for _ in 0..10 {
            assert_eq!(kinds(&registry.plan(&call).unwrap()), first);
        }
    }

    #[test]
    fn test_plan_skips_unregistered_native() {
        let registry = ToolRegistry::builder().spec("echo", multi_tier()).build();
        let plan = registry.plan(&ToolCall::new("echo", json!({}))).unwrap();
        assert_eq!(plan[0].kind(), StrategyKind::Cli);
    }

    #[test]
    fn test_plan_requested_strategy() {
        let registry = ToolRegistry::builder().spec("echo", multi_tier()).build();

        let call = ToolCall::new("echo", json!({})).with_strategy(StrategyKind::Protocol);
        assert_eq!(kinds(&registry.plan(&call).unwrap()), vec![StrategyKind::Protocol]);

        let call = ToolCall::new("echo", json!({})).with_strategy(StrategyKind::Native);
        let err = registry.plan(&call).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidInput(_)));
    }

    #[test]
    fn test_plan_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.plan(&ToolCall::new("nope", json!({}))).unwrap_err();
        assert!(matches!(err, BridgeError::UnknownTool(_)));
    }

    #[test]
    fn test_definitions_follow_requested_order() {
        let registry = ToolRegistry::builder()
            .spec("b", ToolSpec::native("B"))
            .spec("a", ToolSpec::native("A"))
            .build();

        let defs = registry.definitions(&["b".to_string(), "missing".to_string(), "a".to_string()]);
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(registry.tool_names(), vec!["a", "b"]);
    }
}
