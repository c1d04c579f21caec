// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Durable workflow checkpoints.
//!
//! A checkpoint is an immutable snapshot of [`WorkflowState`] keyed by
//! `(thread_id, step_id)`. For any thread, step ids strictly increase and
//! `load` always returns the most recent acknowledged save.
//!
//! Two backends are provided:
//!
//! - [`MemoryCheckpointStore`] for tests and ephemeral runs
//! - [`SqliteCheckpointStore`] for runs that must survive a restart

mod memory;
mod sqlite;

pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::error::CheckpointError;
use crate::workflow::{WorkflowState, WorkflowStatus};

/// One persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub step_id: u64,
    pub state: WorkflowState,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Snapshot `state` under its own thread id and step counter.
    pub fn new(state: WorkflowState) -> Self {
        Self {
            thread_id: state.thread_id.clone(),
            step_id: state.step_counter,
            state,
            created_at: Utc::now(),
        }
    }

    pub fn meta(&self) -> CheckpointMeta {
        CheckpointMeta {
            step_id: self.step_id,
            status: self.state.status,
            cursor: self.state.cursor.to_string(),
            created_at: self.created_at,
        }
    }
}

/// Summary of a checkpoint without its state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub step_id: u64,
    pub status: WorkflowStatus,
    pub cursor: String,
    pub created_at: DateTime<Utc>,
}

/// Storage for workflow checkpoints.
///
/// Implementations must allow concurrent writers on different threads.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint. Fails with `NonMonotonic` unless `step_id` is
    /// greater than every step id already stored for the thread.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Most recent checkpoint for a thread.
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// A specific checkpoint.
    async fn load_at(
        &self,
        thread_id: &str,
        step_id: u64,
    ) -> Result<Option<Checkpoint>, CheckpointError>;

    /// All checkpoints for a thread, ascending by step id.
    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMeta>, CheckpointError>;

    /// Delete checkpoints older than `ttl`. The latest checkpoint of each
    /// thread is always kept.
    async fn prune_expired(&self, ttl: Duration) -> Result<usize, CheckpointError>;

    /// Thread ids with at least one checkpoint, sorted.
    async fn threads(&self) -> Result<Vec<String>, CheckpointError>;
}

/// Hex SHA-256 of serialized state.
pub(crate) fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Creation time before which checkpoints are expired.
pub(crate) fn expiry_cutoff(ttl: Duration) -> Option<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl).ok()?;
    Utc::now().checked_sub_signed(ttl)
}
