// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session cache keyed by tool server name.
//!
//! Each server gets one slot guarded by its own async mutex, so requests to
//! the same server are serialized while different servers proceed
//! concurrently. The map of slots is only locked long enough to find or
//! insert a slot.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;

use super::session::{ServerConfig, ServerRequest, SessionHandle};
use crate::error::BridgeError;

type Slot = Arc<Mutex<Option<SessionHandle>>>;

/// Exclusive access to a server slot.
///
/// If a request future is dropped mid-exchange (cancellation), the session
/// is left unclean and is discarded here; `kill_on_drop` stops its process.
struct SlotGuard<'a>(MutexGuard<'a, Option<SessionHandle>>);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.0.as_ref().is_some_and(|handle| !handle.is_clean()) {
            if let Some(handle) = self.0.take() {
                tracing::debug!(server = %handle.server(), "Discarding session abandoned mid-request");
            }
        }
    }
}

/// Lazily created, idle-reaped tool server sessions.
pub struct SessionPool {
    servers: HashMap<String, ServerConfig>,
    slots: Mutex<HashMap<String, Slot>>,
    idle_timeout: Duration,
}

impl SessionPool {
    pub fn new(servers: HashMap<String, ServerConfig>, idle_timeout: Duration) -> Self {
        Self {
            servers,
            slots: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Launch configuration for a server.
    pub fn server_config(&self, server: &str) -> Option<&ServerConfig> {
        self.servers.get(server)
    }

    async fn slot(&self, server: &str) -> Slot {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(server.to_string()).or_default())
    }

    /// Send a request through the server's cached session, starting one if needed.
    ///
    /// A session that failed at the channel level is dropped so the next call
    /// starts fresh. Tool-reported errors leave the session in place.
    pub async fn request(
        &self,
        server: &str,
        request: &ServerRequest<'_>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        let config = self.servers.get(server).ok_or_else(|| {
            BridgeError::InvalidInput(format!("unknown tool server '{}'", server))
        })?;

        let slot = self.slot(server).await;
        let mut guard = SlotGuard(slot.lock().await);

        if let Some(mut handle) = guard.0.take() {
            if handle.is_clean() && handle.is_alive() && handle.idle_for() < self.idle_timeout {
                *guard.0 = Some(handle);
            } else {
                tracing::debug!(server = %server, "Discarding stale tool server session");
                handle.shutdown().await;
            }
        }

        if guard.0.is_none() {
            *guard.0 = Some(SessionHandle::spawn(server, config).await?);
        }
        let Some(handle) = guard.0.as_mut() else {
            return Err(BridgeError::channel(server, "session unavailable"));
        };

        match handle.request(request, timeout).await {
            Ok(value) => Ok(value),
            Err(err @ BridgeError::Remote { .. }) => Err(err),
            Err(err) => {
                if let Some(handle) = guard.0.take() {
                    handle.shutdown().await;
                }
                Err(err)
            }
        }
    }

    /// Shut down and forget a server's session.
    pub async fn evict(&self, server: &str) {
        let slot = self.slots.lock().await.get(server).cloned();
        if let Some(slot) = slot {
            if let Some(handle) = slot.lock().await.take() {
                handle.shutdown().await;
            }
        }
    }

    /// Names of servers with a live session.
    pub async fn active_sessions(&self) -> Vec<String> {
        let slots: Vec<(String, Slot)> = self
            .slots
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        let mut active = Vec::new();
        for (name, slot) in slots {
            if slot.lock().await.is_some() {
                active.push(name);
            }
        }
        active.sort();
        active
    }

    /// Shut down sessions idle past the timeout. Busy sessions are skipped.
    pub async fn reap_idle(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().await.values().cloned().collect();

        let mut reaped = 0;
        for slot in slots {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            let expired = guard
                .as_ref()
                .is_some_and(|handle| handle.idle_for() >= self.idle_timeout);
            if expired {
                if let Some(handle) = guard.take() {
                    tracing::debug!(server = %handle.server(), "Reaping idle tool server");
                    handle.shutdown().await;
                    reaped += 1;
                }
            }
        }
        reaped
    }

    /// Shut down every session.
    pub async fn shutdown_all(&self) {
        let slots: Vec<Slot> = self.slots.lock().await.drain().map(|(_, v)| v).collect();
        for slot in slots {
            if let Some(handle) = slot.lock().await.take() {
                handle.shutdown().await;
            }
        }
    }

    /// Reap idle sessions periodically until the pool is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let pool: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                let reaped = pool.reap_idle().await;
                if reaped > 0 {
                    tracing::debug!(reaped, "Idle tool servers reaped");
                }
            }
        })
    }
}
