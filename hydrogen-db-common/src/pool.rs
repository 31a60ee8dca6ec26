//! Per-database connection pool (spec §3 "ConnectionPool", §4.3).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::connection::ConnectionHandle;

pub struct PoolEntry {
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub in_use: bool,
    pub connection: Arc<ConnectionHandle>,
}

/// Mockable pool occupancy snapshot, grounded on the teacher's
/// `GetPoolState`/`PoolState` pair (`syncserver-db-common`). Not named in
/// spec.md but implied by "fixed-size array of pool entries"; useful for
/// the ambient metrics hook (see SPEC_FULL.md).
#[derive(Debug, Default, Clone, Copy)]
pub struct PoolState {
    pub connections: u32,
    pub idle_connections: u32,
}

pub trait GetPoolState {
    fn state(&self) -> PoolState;
}

pub struct ConnectionPool {
    entries: Mutex<Vec<PoolEntry>>,
    max_size: usize,
}

impl ConnectionPool {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(max_size)),
            max_size,
        }
    }

    pub async fn destroy(&self) {
        self.entries.lock().await.clear();
    }

    /// Returns an idle entry if one exists, marking it in-use and bumping
    /// `last_used_at`. Returns `None` when the pool has no idle entry — the
    /// caller is expected to `connect` a fresh one and `insert` it.
    pub async fn acquire_idle(&self) -> Option<Arc<ConnectionHandle>> {
        let mut entries = self.entries.lock().await;
        let entry = entries.iter_mut().find(|e| !e.in_use)?;
        entry.in_use = true;
        entry.last_used_at = Utc::now();
        Some(Arc::clone(&entry.connection))
    }

    /// Inserts a newly created connection into the pool as in-use. Fails
    /// (returns `false`, the connection is not inserted) if the pool is at
    /// capacity.
    pub async fn insert(&self, hash: impl Into<String>, connection: Arc<ConnectionHandle>) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.max_size {
            return false;
        }
        let now = Utc::now();
        entries.push(PoolEntry {
            hash: hash.into(),
            created_at: now,
            last_used_at: now,
            in_use: true,
            connection,
        });
        true
    }

    pub async fn release(&self, connection: &Arc<ConnectionHandle>) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| Arc::ptr_eq(&e.connection, connection))
        {
            entry.in_use = false;
            entry.last_used_at = Utc::now();
        }
    }

    /// Evicts idle entries whose last use is strictly older than
    /// `max_idle`. Entries exactly at the boundary (`now - last_used ==
    /// max_idle`) are retained, per spec §8's boundary-behavior property.
    pub async fn cleanup_idle(&self, max_idle: Duration) -> usize {
        let mut entries = self.entries.lock().await;
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|e| {
            if e.in_use {
                return true;
            }
            let idle = (now - e.last_used_at).to_std().unwrap_or_default();
            idle <= max_idle
        });
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl GetPoolState for ConnectionPool {
    fn state(&self) -> PoolState {
        // Best-effort snapshot via try_lock: pool state is informational
        // (metrics), never load-bearing, so a contended lock just reports
        // the last known size of zero rather than blocking a sync caller.
        match self.entries.try_lock() {
            Ok(entries) => PoolState {
                connections: entries.len() as u32,
                idle_connections: entries.iter().filter(|e| !e.in_use).count() as u32,
            },
            Err(_) => PoolState::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineKind;

    #[tokio::test]
    async fn cleanup_idle_retains_boundary_and_in_use() {
        let pool = ConnectionPool::new(4);
        let conn = Arc::new(ConnectionHandle::new(EngineKind::Sqlite, "DB-SQLITE-t", 10));
        pool.insert("h1", Arc::clone(&conn)).await;
        pool.release(&conn).await;

        // Freshly released, well within any idle window.
        let evicted = pool.cleanup_idle(Duration::from_secs(3600)).await;
        assert_eq!(evicted, 0);
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn cleanup_idle_skips_in_use_entries() {
        let pool = ConnectionPool::new(4);
        let conn = Arc::new(ConnectionHandle::new(EngineKind::Sqlite, "DB-SQLITE-t", 10));
        pool.insert("h1", Arc::clone(&conn)).await; // stays in_use

        let evicted = pool.cleanup_idle(Duration::from_secs(0)).await;
        assert_eq!(evicted, 0);
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn insert_fails_past_capacity() {
        let pool = ConnectionPool::new(1);
        let conn1 = Arc::new(ConnectionHandle::new(EngineKind::Sqlite, "DB-SQLITE-1", 10));
        let conn2 = Arc::new(ConnectionHandle::new(EngineKind::Sqlite, "DB-SQLITE-2", 10));
        assert!(pool.insert("h1", conn1).await);
        assert!(!pool.insert("h2", conn2).await);
    }
}
