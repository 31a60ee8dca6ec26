//! Per-connection prepared-statement cache with capacity-bounded LRU
//! eviction (spec §3 "PreparedStatementCache", §4.4).

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;

/// Global monotonic counter stamped on a slot every time it's touched.
/// Shared process-wide (not per-cache) per spec's "global monotonic" note;
/// only relative order between slots of the *same* cache is ever compared.
static LRU_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_counter() -> u64 {
    LRU_COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub struct PreparedStatement {
    pub name: String,
    pub sql_template: String,
    pub created_at: DateTime<Utc>,
    pub usage_count: u64,
    pub native_handle: Option<Box<dyn Any + Send>>,
}

impl PreparedStatement {
    pub fn new(name: impl Into<String>, sql_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_template: sql_template.into(),
            created_at: Utc::now(),
            usage_count: 0,
            native_handle: None,
        }
    }
}

/// Issues the engine's DEALLOCATE-equivalent for an evicted or explicitly
/// unprepared statement. Implemented by each engine adapter crate; kept
/// generic here so cache bookkeeping has no engine-specific dependency.
#[async_trait]
pub trait StatementDeallocator: Send {
    async fn deallocate(&mut self, stmt: &PreparedStatement) -> Result<(), DbError>;
}

/// Parallel-array LRU cache: `statements[i]` and `counters[i]` describe the
/// same slot. Invariant: `len() <= capacity`; the slot with the smallest
/// counter is always the next eviction victim.
pub struct PreparedStatementCache {
    capacity: usize,
    statements: Vec<PreparedStatement>,
    counters: Vec<u64>,
}

impl PreparedStatementCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            statements: Vec::new(),
            counters: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, name: &str) -> Option<&PreparedStatement> {
        self.statements.iter().find(|s| s.name == name)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.statements.iter().position(|s| s.name == name)
    }

    /// Touches a slot on lookup, bumping its LRU counter above every prior
    /// value for that slot. Returns `false` if not present.
    pub fn touch(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(idx) => {
                self.counters[idx] = next_counter();
                self.statements[idx].usage_count += 1;
                true
            }
            None => false,
        }
    }

    fn victim_index(&self) -> usize {
        self.counters
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| **c)
            .map(|(idx, _)| idx)
            .expect("victim_index called on a full (non-empty) cache")
    }

    /// Inserts a freshly-prepared statement, evicting the least-recently
    /// used slot first if the cache is full. If the eviction's DEALLOCATE
    /// call fails, the victim is left in place and the insertion fails
    /// without side effects.
    pub async fn insert(
        &mut self,
        stmt: PreparedStatement,
        deallocator: &mut dyn StatementDeallocator,
    ) -> Result<(), DbError> {
        if self.statements.len() < self.capacity {
            self.statements.push(stmt);
            self.counters.push(next_counter());
            return Ok(());
        }

        let victim_idx = self.victim_index();
        deallocator.deallocate(&self.statements[victim_idx]).await?;

        self.statements.remove(victim_idx);
        self.counters.remove(victim_idx);
        self.statements.push(stmt);
        self.counters.push(next_counter());
        Ok(())
    }

    /// Explicitly unprepares a statement by name. Leaves the statement in
    /// place if DEALLOCATE fails.
    pub async fn remove(
        &mut self,
        name: &str,
        deallocator: &mut dyn StatementDeallocator,
    ) -> Result<bool, DbError> {
        let Some(idx) = self.position(name) else {
            return Ok(false);
        };
        deallocator.deallocate(&self.statements[idx]).await?;
        self.statements.remove(idx);
        self.counters.remove(idx);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopDeallocator {
        fail_names: Vec<String>,
    }

    #[async_trait]
    impl StatementDeallocator for NoopDeallocator {
        async fn deallocate(&mut self, stmt: &PreparedStatement) -> Result<(), DbError> {
            if self.fail_names.contains(&stmt.name) {
                Err(DbError::backend_protocol("deallocate failed"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn lru_eviction_matches_capacity_two_example() {
        let mut cache = PreparedStatementCache::new(2);
        let mut dealloc = NoopDeallocator { fail_names: vec![] };

        cache
            .insert(PreparedStatement::new("stmt_1", "select 1"), &mut dealloc)
            .await
            .unwrap();
        cache
            .insert(PreparedStatement::new("stmt_2", "select 2"), &mut dealloc)
            .await
            .unwrap();
        cache
            .insert(PreparedStatement::new("stmt_3", "select 3"), &mut dealloc)
            .await
            .unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get("stmt_1").is_none());
        assert!(cache.get("stmt_2").is_some());
        assert!(cache.get("stmt_3").is_some());
        assert_eq!(cache.position("stmt_2"), Some(0));
    }

    #[tokio::test]
    async fn failed_deallocate_keeps_victim_and_fails_insert() {
        let mut cache = PreparedStatementCache::new(1);
        let mut dealloc = NoopDeallocator {
            fail_names: vec!["stmt_1".to_owned()],
        };

        cache
            .insert(PreparedStatement::new("stmt_1", "select 1"), &mut dealloc)
            .await
            .unwrap();

        let result = cache
            .insert(PreparedStatement::new("stmt_2", "select 2"), &mut dealloc)
            .await;
        assert!(result.is_err());
        assert_eq!(cache.len(), 1);
        assert!(cache.get("stmt_1").is_some());
    }

    #[tokio::test]
    async fn touch_promotes_recency() {
        let mut cache = PreparedStatementCache::new(2);
        let mut dealloc = NoopDeallocator { fail_names: vec![] };
        cache
            .insert(PreparedStatement::new("stmt_1", "a"), &mut dealloc)
            .await
            .unwrap();
        cache
            .insert(PreparedStatement::new("stmt_2", "b"), &mut dealloc)
            .await
            .unwrap();

        // Touch stmt_1 so stmt_2 becomes the LRU victim instead.
        assert!(cache.touch("stmt_1"));
        cache
            .insert(PreparedStatement::new("stmt_3", "c"), &mut dealloc)
            .await
            .unwrap();

        assert!(cache.get("stmt_1").is_some());
        assert!(cache.get("stmt_2").is_none());
        assert!(cache.get("stmt_3").is_some());
    }
}
