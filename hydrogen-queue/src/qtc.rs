//! Query Template Cache: the per-database catalog of parameterized SQL
//! templates loaded from the database itself at bootstrap (spec §3 "QTC",
//! §4.7).

use hydrogen_db_common::DbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredQueueType {
    Lead,
    Slow,
    Medium,
    Fast,
    Cache,
}

impl PreferredQueueType {
    /// Bootstrap rows carry `queue` as an integer 1..4; any other value maps
    /// to `Slow` (spec §6, §9 "observed quirks").
    pub fn from_bootstrap_value(value: i64) -> Self {
        match value {
            1 => PreferredQueueType::Fast,
            2 => PreferredQueueType::Medium,
            3 => PreferredQueueType::Slow,
            4 => PreferredQueueType::Cache,
            _ => PreferredQueueType::Slow,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PreferredQueueType::Lead => "lead",
            PreferredQueueType::Slow => "slow",
            PreferredQueueType::Medium => "medium",
            PreferredQueueType::Fast => "fast",
            PreferredQueueType::Cache => "cache",
        }
    }

    /// Maps a QTC entry's preference onto the worker queue type the selector
    /// understands. `Lead` has no worker counterpart (the lead queue runs
    /// bootstrap/heartbeat traffic, not dispatched queries).
    pub fn as_queue_type(&self) -> Option<crate::queue::QueueType> {
        match self {
            PreferredQueueType::Lead => None,
            PreferredQueueType::Slow => Some(crate::queue::QueueType::Slow),
            PreferredQueueType::Medium => Some(crate::queue::QueueType::Medium),
            PreferredQueueType::Fast => Some(crate::queue::QueueType::Fast),
            PreferredQueueType::Cache => Some(crate::queue::QueueType::Cache),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryCacheEntry {
    pub query_ref: i64,
    pub query_type: i64,
    pub sql_template: String,
    pub description: String,
    pub preferred_queue_type: PreferredQueueType,
    pub timeout_seconds: u32,
    pub usage_count: u64,
}

impl QueryCacheEntry {
    pub fn new(
        query_ref: i64,
        query_type: i64,
        sql_template: impl Into<String>,
        description: impl Into<String>,
        preferred_queue_type: PreferredQueueType,
        timeout_seconds: u32,
    ) -> Self {
        Self {
            query_ref,
            query_type,
            sql_template: sql_template.into(),
            description: description.into(),
            preferred_queue_type,
            timeout_seconds,
            usage_count: 0,
        }
    }
}

const INITIAL_CAPACITY: usize = 64;

/// Grows (doubles) past its initial capacity rather than rejecting inserts,
/// per spec §3; the visible cap only matters for `stats()`.
#[derive(Debug, Default)]
pub struct QueryTableCache {
    entries: Vec<QueryCacheEntry>,
    capacity: usize,
}

impl QueryTableCache {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(INITIAL_CAPACITY),
            capacity: INITIAL_CAPACITY,
        }
    }

    pub fn destroy(&mut self) {
        self.entries.clear();
    }

    /// Rejects duplicate `query_ref`s (spec's round-trip law:
    /// `add(e1); add(e1); count() == 1`).
    pub fn add_entry(&mut self, entry: QueryCacheEntry) -> Result<(), DbError> {
        if self.entries.iter().any(|e| e.query_ref == entry.query_ref) {
            return Err(DbError::parameter_invalid(format!(
                "duplicate query_ref {}",
                entry.query_ref
            )));
        }
        if self.entries.len() == self.capacity {
            self.capacity *= 2;
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Looks up by `query_ref`, incrementing its usage counter.
    pub fn lookup(&mut self, query_ref: i64) -> Option<&QueryCacheEntry> {
        let entry = self.entries.iter_mut().find(|e| e.query_ref == query_ref)?;
        entry.usage_count += 1;
        Some(&*entry)
    }

    pub fn update_usage(&mut self, query_ref: i64, usage_count: u64) -> bool {
        match self.entries.iter_mut().find(|e| e.query_ref == query_ref) {
            Some(entry) => {
                entry.usage_count = usage_count;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, query_ref: i64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.query_ref != query_ref);
        before != self.entries.len()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Every cached entry, in insertion order. Used by `dispatch` callers to
    /// resolve a `query_ref` to its `preferred_queue_type` before routing.
    pub fn entries(&self) -> &[QueryCacheEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> (usize, usize) {
        (self.entries.len(), self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_round_trip_empties_cache() {
        let mut qtc = QueryTableCache::new();
        let entry = QueryCacheEntry::new(1, 0, "select 1", "", PreferredQueueType::Fast, 5);
        qtc.add_entry(entry.clone()).unwrap();
        qtc.remove(1);
        assert_eq!(qtc.count(), 0);
    }

    #[test]
    fn duplicate_query_ref_is_rejected() {
        let mut qtc = QueryTableCache::new();
        let entry = QueryCacheEntry::new(1, 0, "select 1", "", PreferredQueueType::Fast, 5);
        qtc.add_entry(entry.clone()).unwrap();
        assert!(qtc.add_entry(entry).is_err());
        assert_eq!(qtc.count(), 1);
    }

    #[test]
    fn unknown_queue_value_maps_to_slow() {
        assert_eq!(
            PreferredQueueType::from_bootstrap_value(99),
            PreferredQueueType::Slow
        );
        assert_eq!(
            PreferredQueueType::from_bootstrap_value(1),
            PreferredQueueType::Fast
        );
    }

    #[test]
    fn capacity_doubles_past_initial_size() {
        let mut qtc = QueryTableCache::new();
        for i in 0..(INITIAL_CAPACITY as i64) {
            qtc.add_entry(QueryCacheEntry::new(i, 0, "select 1", "", PreferredQueueType::Slow, 1))
                .unwrap();
        }
        let (_, cap_before) = qtc.stats();
        assert_eq!(cap_before, INITIAL_CAPACITY);
        qtc.add_entry(QueryCacheEntry::new(
            INITIAL_CAPACITY as i64,
            0,
            "select 1",
            "",
            PreferredQueueType::Slow,
            1,
        ))
        .unwrap();
        let (count, cap_after) = qtc.stats();
        assert_eq!(count, INITIAL_CAPACITY + 1);
        assert_eq!(cap_after, INITIAL_CAPACITY * 2);
    }
}
