// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wiring from resolved configuration to a running engine.

use anyhow::{anyhow, Context};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::agent::AgentStep;
use crate::bridge::ToolBridge;
use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};
use crate::config::{CheckpointBackend, ResolvedConfig};
use crate::context::ContextManager;
use crate::error::Result;
use crate::providers::create_model;
use crate::tools::{NativeTool, ToolRegistry};
use crate::types::LanguageModel;
use crate::workflow::{WorkflowEngine, WorkflowGraph};

/// Everything a CLI invocation needs: engine, bridge, and store.
pub struct Runtime {
    engine: WorkflowEngine,
    bridge: Arc<ToolBridge>,
    store: Arc<dyn CheckpointStore>,
    config: ResolvedConfig,
    reaper: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Build from config, creating the model client it names.
    pub fn from_config(config: ResolvedConfig) -> Result<Self> {
        let model = create_model(&config.model).context("Failed to create model client")?;
        Self::assemble(config, model, Vec::new())
    }

    /// Build from config with an explicit model and in-process tools.
    pub fn assemble(
        config: ResolvedConfig,
        model: Arc<dyn LanguageModel>,
        natives: Vec<Arc<dyn NativeTool>>,
    ) -> Result<Self> {
        let mut registry = ToolRegistry::builder().specs(config.tools.clone());
        for native in natives {
            registry = registry.native_arc(native);
        }
        let bridge = Arc::new(ToolBridge::new(
            Arc::new(registry.build()),
            config.servers.clone(),
            config.bridge.clone(),
        ));

        let store: Arc<dyn CheckpointStore> = match config.checkpoint.backend {
            CheckpointBackend::Sqlite => Arc::new(
                SqliteCheckpointStore::open(&config.checkpoint.path).with_context(|| {
                    format!(
                        "Failed to open checkpoint store {}",
                        config.checkpoint.path.display()
                    )
                })?,
            ),
            CheckpointBackend::Memory => Arc::new(MemoryCheckpointStore::new()),
        };

        let graph = WorkflowGraph::new(config.workflow_steps(), config.routes.clone())?;
        let context = ContextManager::new().with_summaries(config.summarize_dropped);

        let mut builder = WorkflowEngine::builder(graph, Arc::clone(&store))
            .config(config.engine.clone())
            .bridge(Arc::clone(&bridge));
        for step in config.workflow_steps() {
            let agent = config
                .agent(&step)
                .ok_or_else(|| anyhow!("no agent defined for step '{}'", step))?;
            let executor = AgentStep::new(agent.clone(), Arc::clone(&model))
                .with_bridge(Arc::clone(&bridge))
                .with_context(context.clone())
                .with_default_budget(config.context);
            builder = builder.step(step, Arc::new(executor));
        }

        info!(
            steps = config.workflow_steps().len(),
            tools = config.tools.len(),
            backend = ?config.checkpoint.backend,
            "Runtime assembled"
        );

        Ok(Self {
            engine: builder.build()?,
            bridge,
            store,
            config,
            reaper: None,
        })
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Start reaping idle tool server sessions. Must run inside Tokio.
    pub fn start_reaper(&mut self) {
        if self.reaper.is_none() {
            self.reaper = Some(self.bridge.spawn_reaper(self.config.reap_interval));
        }
    }

    /// Drop checkpoints past the configured TTL. Returns rows removed.
    pub async fn prune_expired(&self) -> Result<usize> {
        let Some(ttl) = self.config.checkpoint.ttl else {
            return Ok(0);
        };
        let removed = self.store.prune_expired(ttl).await?;
        if removed > 0 {
            info!(removed, "Pruned expired checkpoints");
        }
        Ok(removed)
    }

    /// Stop the reaper and close tool server sessions.
    pub async fn shutdown(mut self) {
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }
        self.engine.shutdown().await;
    }
}
