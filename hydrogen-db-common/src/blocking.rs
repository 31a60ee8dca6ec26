//! Threadpool for running blocking (synchronous driver) work off the async
//! executor. Grounded on `syncserver-common::BlockingThreadpool`: engine
//! adapters that wrap a synchronous driver (diesel connections, `rusqlite`)
//! call through this rather than `tokio::task::spawn_blocking` directly, so
//! the in-flight count is observable.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::DbError;

#[derive(Debug, Default)]
pub struct BlockingThreadpool {
    spawned_tasks: AtomicU64,
}

impl BlockingThreadpool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` on tokio's blocking pool. Spawning blocking driver work any
    /// other way undercounts `active_threads`.
    pub async fn spawn<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce() -> Result<T, DbError> + Send + 'static,
        T: Send + 'static,
    {
        self.spawned_tasks.fetch_add(1, Ordering::Relaxed);
        let result = tokio::task::spawn_blocking(f)
            .await
            .unwrap_or_else(|_| Err(DbError::internal("blocking task panicked or was cancelled")));
        self.spawned_tasks.fetch_sub(1, Ordering::Relaxed);
        result
    }

    pub fn active_threads(&self) -> u64 {
        self.spawned_tasks.load(Ordering::Relaxed)
    }
}

impl fmt::Display for BlockingThreadpool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockingThreadpool(active={})", self.active_threads())
    }
}
