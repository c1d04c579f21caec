// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory checkpoint store.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use super::{expiry_cutoff, Checkpoint, CheckpointMeta, CheckpointStore};
use crate::error::CheckpointError;

type ThreadLog = Arc<Mutex<BTreeMap<u64, Checkpoint>>>;

/// Checkpoints held in process memory.
///
/// Each thread has its own log behind its own lock; the registry lock is only
/// held to look up or insert a log.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    threads: RwLock<HashMap<String, ThreadLog>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self, thread_id: &str) -> Option<ThreadLog> {
        let threads = self
            .threads
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        threads.get(thread_id).cloned()
    }

    fn log_or_insert(&self, thread_id: &str) -> ThreadLog {
        if let Some(log) = self.log(thread_id) {
            return log;
        }
        let mut threads = self
            .threads
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(threads.entry(thread_id.to_string()).or_default())
    }

    fn all_logs(&self) -> Vec<ThreadLog> {
        self.threads
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

fn lock(log: &ThreadLog) -> MutexGuard<'_, BTreeMap<u64, Checkpoint>> {
    log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let log = self.log_or_insert(&checkpoint.thread_id);
        let mut entries = lock(&log);
        if let Some((&latest, _)) = entries.last_key_value() {
            if checkpoint.step_id <= latest {
                return Err(CheckpointError::NonMonotonic {
                    thread_id: checkpoint.thread_id.clone(),
                    step_id: checkpoint.step_id,
                    latest,
                });
            }
        }
        entries.insert(checkpoint.step_id, checkpoint.clone());
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self
            .log(thread_id)
            .and_then(|log| lock(&log).last_key_value().map(|(_, c)| c.clone())))
    }

    async fn load_at(
        &self,
        thread_id: &str,
        step_id: u64,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self
            .log(thread_id)
            .and_then(|log| lock(&log).get(&step_id).cloned()))
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMeta>, CheckpointError> {
        Ok(self
            .log(thread_id)
            .map(|log| lock(&log).values().map(Checkpoint::meta).collect())
            .unwrap_or_default())
    }

    async fn prune_expired(&self, ttl: Duration) -> Result<usize, CheckpointError> {
        let Some(cutoff) = expiry_cutoff(ttl) else {
            return Ok(0);
        };

        let mut pruned = 0;
        for log in self.all_logs() {
            let mut entries = lock(&log);
            let Some(&latest) = entries.keys().next_back() else {
                continue;
            };
            let before = entries.len();
            entries.retain(|&step_id, c| step_id == latest || c.created_at >= cutoff);
            pruned += before - entries.len();
        }
        Ok(pruned)
    }

    async fn threads(&self) -> Result<Vec<String>, CheckpointError> {
        let threads = self
            .threads
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names: Vec<String> = threads
            .iter()
            .filter(|(_, log)| !lock(log).is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowState;
    use chrono::Utc;

    fn checkpoint(thread: &str, step_id: u64) -> Checkpoint {
        let mut state = WorkflowState::new(thread, "task", "a");
        state.step_counter = step_id;
        Checkpoint::new(state)
    }

    #[tokio::test]
    async fn test_load_returns_latest() {
        let store = MemoryCheckpointStore::new();
        store.save(&checkpoint("t1", 1)).await.unwrap();
        store.save(&checkpoint("t1", 2)).await.unwrap();
        store.save(&checkpoint("t1", 5)).await.unwrap();

        assert_eq!(store.load("t1").await.unwrap().unwrap().step_id, 5);
        assert_eq!(store.load_at("t1", 2).await.unwrap().unwrap().step_id, 2);
        assert!(store.load_at("t1", 3).await.unwrap().is_none());
        assert!(store.load("missing").await.unwrap().is_none());

        let ids: Vec<u64> = store.list("t1").await.unwrap().iter().map(|m| m.step_id).collect();
        assert_eq!(ids, vec![1, 2, 5]);
    }

    #[tokio::test]
    async fn test_rejects_non_monotonic() {
        let store = MemoryCheckpointStore::new();
        store.save(&checkpoint("t1", 3)).await.unwrap();

        let err = store.save(&checkpoint("t1", 3)).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NonMonotonic { latest: 3, .. }));
        assert!(store.save(&checkpoint("t1", 2)).await.is_err());
        // Other threads are independent.
        store.save(&checkpoint("t2", 1)).await.unwrap();
        assert_eq!(store.load("t1").await.unwrap().unwrap().step_id, 3);
    }

    #[tokio::test]
    async fn test_prune_keeps_latest() {
        let store = MemoryCheckpointStore::new();
        let old = Utc::now() - chrono::Duration::hours(2);
        for step_id in 1..=3 {
            let mut c = checkpoint("t1", step_id);
            c.created_at = old;
            store.save(&c).await.unwrap();
        }
        store.save(&checkpoint("t2", 1)).await.unwrap();

        let pruned = store.prune_expired(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(pruned, 2);
        assert_eq!(store.load("t1").await.unwrap().unwrap().step_id, 3);
        assert_eq!(store.threads().await.unwrap(), vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn test_concurrent_writers_on_different_threads() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut handles = Vec::new();
        for t in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let thread = format!("thread-{t}");
                for step_id in 1..=20 {
                    store.save(&checkpoint(&thread, step_id)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.threads().await.unwrap().len(), 8);
        for t in 0..8 {
            let latest = store.load(&format!("thread-{t}")).await.unwrap().unwrap();
            assert_eq!(latest.step_id, 20);
        }
    }
}
