// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SQLite-backed checkpoint store.
//!
//! Every operation opens its own connection on the blocking pool, so writers
//! on different threads only contend inside SQLite itself (WAL mode with a
//! busy timeout).

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
#[cfg(feature = "telemetry")]
use std::time::Instant;

use super::{digest, expiry_cutoff, Checkpoint, CheckpointMeta, CheckpointStore};
use crate::error::CheckpointError;
use crate::workflow::{WorkflowState, WorkflowStatus};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Checkpoints in a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    path: PathBuf,
}

impl SqliteCheckpointStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = connect(&path)?;
        init_schema(&conn)?;
        tracing::debug!(path = %path.display(), "Checkpoint store opened");

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `op` with a fresh connection on the blocking pool.
    async fn with_conn<T, F>(&self, label: &'static str, op: F) -> Result<T, CheckpointError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, CheckpointError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            #[cfg(feature = "telemetry")]
            let start = Instant::now();

            let mut conn = connect(&path)?;
            let result = op(&mut conn);

            #[cfg(feature = "telemetry")]
            tracing::trace!(
                operation = label,
                elapsed_us = start.elapsed().as_micros() as u64,
                "checkpoint storage"
            );
            #[cfg(not(feature = "telemetry"))]
            let _ = label;

            result
        })
        .await
        .map_err(|e| CheckpointError::Storage(format!("storage task failed: {}", e)))?
    }
}

fn connect(path: &Path) -> Result<Connection, CheckpointError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    // WAL lets readers proceed while another thread's checkpoint is written.
    // FULL syncs the WAL on every commit so an acknowledged save survives
    // power loss.
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<(), CheckpointError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS checkpoints (
            thread_id TEXT NOT NULL,
            step_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            cursor TEXT NOT NULL,
            state TEXT NOT NULL,
            digest TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (thread_id, step_id)
        );

        CREATE INDEX IF NOT EXISTS idx_checkpoints_created_at ON checkpoints(created_at);
        "#,
    )?;

    let current_version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    if current_version.is_none() {
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?)",
            params![SCHEMA_VERSION],
        )?;
    }
    Ok(())
}

fn timestamp(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn parse_status(value: &str) -> Result<WorkflowStatus, CheckpointError> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|e| CheckpointError::Serialization(format!("bad status '{}': {}", value, e)))
}

/// Deserialize a stored row, verifying its digest first.
fn decode(
    thread_id: String,
    step_id: i64,
    state: String,
    stored_digest: String,
    created_at: i64,
) -> Result<Checkpoint, CheckpointError> {
    let step_id = step_id as u64;
    if digest(state.as_bytes()) != stored_digest {
        tracing::warn!(thread_id = %thread_id, step_id, "Checkpoint digest mismatch");
        return Err(CheckpointError::Corrupted { thread_id, step_id });
    }
    let state: WorkflowState = serde_json::from_str(&state)?;
    Ok(Checkpoint {
        thread_id,
        step_id,
        state,
        created_at: timestamp(created_at),
    })
}

type Row = (String, i64, String, String, i64);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let state = serde_json::to_string(&checkpoint.state)?;
        let state_digest = digest(state.as_bytes());
        let thread_id = checkpoint.thread_id.clone();
        let step_id = checkpoint.step_id;
        let status = checkpoint.state.status.as_str();
        let cursor = checkpoint.state.cursor.to_string();
        let created_at = checkpoint.created_at.timestamp_millis();

        self.with_conn("checkpoint.save", move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let latest: Option<i64> = tx.query_row(
                "SELECT MAX(step_id) FROM checkpoints WHERE thread_id = ?",
                params![thread_id],
                |row| row.get(0),
            )?;
            if let Some(latest) = latest {
                if step_id as i64 <= latest {
                    return Err(CheckpointError::NonMonotonic {
                        thread_id,
                        step_id,
                        latest: latest as u64,
                    });
                }
            }
            tx.execute(
                r#"
                INSERT INTO checkpoints (thread_id, step_id, status, cursor, state, digest, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    thread_id,
                    step_id as i64,
                    status,
                    cursor,
                    state,
                    state_digest,
                    created_at
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let thread_id = thread_id.to_string();
        self.with_conn("checkpoint.load", move |conn| {
            let row = conn
                .query_row(
                    r#"
                    SELECT thread_id, step_id, state, digest, created_at FROM checkpoints
                    WHERE thread_id = ? ORDER BY step_id DESC LIMIT 1
                    "#,
                    params![thread_id],
                    read_row,
                )
                .optional()?;
            row.map(|(t, s, state, d, c)| decode(t, s, state, d, c))
                .transpose()
        })
        .await
    }

    async fn load_at(
        &self,
        thread_id: &str,
        step_id: u64,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        let thread_id = thread_id.to_string();
        self.with_conn("checkpoint.load_at", move |conn| {
            let row = conn
                .query_row(
                    r#"
                    SELECT thread_id, step_id, state, digest, created_at FROM checkpoints
                    WHERE thread_id = ? AND step_id = ?
                    "#,
                    params![thread_id, step_id as i64],
                    read_row,
                )
                .optional()?;
            row.map(|(t, s, state, d, c)| decode(t, s, state, d, c))
                .transpose()
        })
        .await
    }

    async fn list(&self, thread_id: &str) -> Result<Vec<CheckpointMeta>, CheckpointError> {
        let thread_id = thread_id.to_string();
        self.with_conn("checkpoint.list", move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT step_id, status, cursor, created_at FROM checkpoints
                WHERE thread_id = ? ORDER BY step_id ASC
                "#,
            )?;
            let rows = stmt
                .query_map(params![thread_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let metas: Result<Vec<CheckpointMeta>, CheckpointError> = rows
                .into_iter()
                .map(|(step_id, status, cursor, created_at)| {
                    Ok(CheckpointMeta {
                        step_id: step_id as u64,
                        status: parse_status(&status)?,
                        cursor,
                        created_at: timestamp(created_at),
                    })
                })
                .collect();
            metas
        })
        .await
    }

    async fn prune_expired(&self, ttl: Duration) -> Result<usize, CheckpointError> {
        let Some(cutoff) = expiry_cutoff(ttl) else {
            return Ok(0);
        };
        let cutoff = cutoff.timestamp_millis();

        let pruned = self
            .with_conn("checkpoint.prune", move |conn| {
                let deleted = conn.execute(
                    r#"
                    DELETE FROM checkpoints
                    WHERE created_at < ?
                      AND step_id < (
                          SELECT MAX(latest.step_id) FROM checkpoints AS latest
                          WHERE latest.thread_id = checkpoints.thread_id
                      )
                    "#,
                    params![cutoff],
                )?;
                Ok(deleted)
            })
            .await?;

        if pruned > 0 {
            tracing::debug!(pruned, "Pruned expired checkpoints");
        }
        Ok(pruned)
    }

    async fn threads(&self) -> Result<Vec<String>, CheckpointError> {
        self.with_conn("checkpoint.threads", |conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT thread_id FROM checkpoints ORDER BY thread_id")?;
            let threads = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(threads)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn checkpoint(thread: &str, step_id: u64) -> Checkpoint {
        let mut state = WorkflowState::new(thread, "summarize repository X", "research");
        state.step_counter = step_id;
        Checkpoint::new(state)
    }

    #[test]
    fn test_connections_sync_every_commit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoints.db");
        SqliteCheckpointStore::open(&path).unwrap();

        let conn = connect(&path).unwrap();
        let synchronous: i64 = conn
            .query_row("PRAGMA synchronous", [], |row| row.get(0))
            .unwrap();
        // 2 = FULL
        assert_eq!(synchronous, 2);
        let journal: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal, "wal");
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = SqliteCheckpointStore::open(dir.path().join("checkpoints.db")).unwrap();

        let first = checkpoint("t1", 1);
        store.save(&first).await.unwrap();
        store.save(&checkpoint("t1", 2)).await.unwrap();

        let latest = store.load("t1").await.unwrap().unwrap();
        assert_eq!(latest.step_id, 2);
        assert_eq!(latest.state.task, "summarize repository X");

        let at = store.load_at("t1", 1).await.unwrap().unwrap();
        assert_eq!(at.state, first.state);
        assert_eq!(at.created_at.timestamp_millis(), first.created_at.timestamp_millis());

        assert!(store.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("checkpoints.db");
        {
            let store = SqliteCheckpointStore::open(&path).unwrap();
            store.save(&checkpoint("t1", 1)).await.unwrap();
            store.save(&checkpoint("t1", 4)).await.unwrap();
        }

        let store = SqliteCheckpointStore::open(&path).unwrap();
        assert_eq!(store.load("t1").await.unwrap().unwrap().step_id, 4);
        let metas = store.list("t1").await.unwrap();
        assert_eq!(metas.iter().map(|m| m.step_id).collect::<Vec<_>>(), vec![1, 4]);
        assert_eq!(metas[0].status, WorkflowStatus::Running);
        assert_eq!(metas[0].cursor, "research");
    }

    #[tokio::test]
    async fn test_rejects_non_monotonic() {
        let dir = TempDir::new().unwrap();
        let store = SqliteCheckpointStore::open(dir.path().join("c.db")).unwrap();
        store.save(&checkpoint("t1", 2)).await.unwrap();

        let err = store.save(&checkpoint("t1", 1)).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NonMonotonic { latest: 2, .. }));
        assert_eq!(store.load("t1").await.unwrap().unwrap().step_id, 2);
    }

    #[tokio::test]
    async fn test_detects_tampered_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.db");
        let store = SqliteCheckpointStore::open(&path).unwrap();
        store.save(&checkpoint("t1", 1)).await.unwrap();

        let conn = Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE checkpoints SET state = replace(state, 'repository X', 'repository Y')",
            [],
        )
        .unwrap();

        let err = store.load("t1").await.unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupted { step_id: 1, .. }));
    }

    #[tokio::test]
    async fn test_prune_keeps_latest_per_thread() {
        let dir = TempDir::new().unwrap();
        let store = SqliteCheckpointStore::open(dir.path().join("c.db")).unwrap();
        let old = Utc::now() - chrono::Duration::days(2);
        for step_id in 1..=3 {
            let mut c = checkpoint("old", step_id);
            c.created_at = old;
            store.save(&c).await.unwrap();
        }
        store.save(&checkpoint("fresh", 1)).await.unwrap();

        let pruned = store.prune_expired(Duration::from_secs(86_400)).await.unwrap();
        assert_eq!(pruned, 2);
        assert_eq!(store.load("old").await.unwrap().unwrap().step_id, 3);
        assert_eq!(store.threads().await.unwrap(), vec!["fresh", "old"]);
    }

    #[tokio::test]
    async fn test_concurrent_threads() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(SqliteCheckpointStore::open(dir.path().join("c.db")).unwrap());

        let mut handles = Vec::new();
        for t in 0..4 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let thread = format!("t{t}");
                for step_id in 1..=5 {
                    store.save(&checkpoint(&thread, step_id)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        for t in 0..4 {
            assert_eq!(store.load(&format!("t{t}")).await.unwrap().unwrap().step_id, 5);
        }
    }
}
