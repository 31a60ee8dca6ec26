//! Worker execution loop and idle-pool sweeper (spec §2/§5 "worker thread";
//! `cleanup_idle` as a scheduled task per `MysqlDbPool::spawn_sweeper`).
//!
//! Each worker `DatabaseQueue` dequeues `WorkItem`s and runs them against a
//! connection pulled from the database's shared `ConnectionPool`, creating a
//! fresh connection on a pool miss and returning it to the pool afterward.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use hydrogen_db_common::{ConnectionConfig, ConnectionPool, EngineAdapter, GetPoolState, QueryResult};

use crate::queue::DatabaseQueue;

async fn execute_one(
    queue: &DatabaseQueue,
    adapter: &dyn EngineAdapter,
    pool: &ConnectionPool,
    request: &hydrogen_db_common::QueryRequest,
) -> QueryResult {
    let handle = match pool.acquire_idle().await {
        Some(handle) => handle,
        None => {
            let config = ConnectionConfig {
                connection_string: Some(queue.connection_string.clone()),
                ..Default::default()
            };
            match adapter.connect(&config, &queue.designator).await {
                Ok(handle) => {
                    pool.insert(queue.connection_string.clone(), Arc::clone(&handle)).await;
                    handle
                }
                Err(e) => return QueryResult::failure(format!("{}", e)),
            }
        }
    };

    let result = adapter.execute(&handle, request).await;
    pool.release(&handle).await;
    result
}

/// Runs until `shutdown_requested` is set or the queue's channel closes.
/// In-flight requests (the one currently being awaited on below) always run
/// to completion before the loop re-checks `shutdown_requested` (spec §5:
/// "in-flight requests run to completion").
pub async fn run_worker_loop(queue: Arc<DatabaseQueue>, adapter: Arc<dyn EngineAdapter>, pool: Arc<ConnectionPool>) {
    loop {
        if queue.shutdown_requested.load(Ordering::Acquire) {
            break;
        }
        let Some(item) = queue.dequeue().await else {
            break;
        };
        let result = execute_one(&queue, adapter.as_ref(), &pool, &item.request).await;
        if let Some(respond_to) = item.respond_to {
            let _ = respond_to.send(result);
        }
    }
}

/// Periodically evicts idle pool entries, grounded on
/// `SpannerDbPool::spawn_sweeper`'s interval-loop shape. A `None` `max_idle`
/// disables sweeping entirely, matching the teacher's `Option<max_idle>`
/// early return.
pub async fn run_idle_sweeper(pool: Arc<ConnectionPool>, interval: Duration, max_idle: Option<Duration>) {
    let Some(max_idle) = max_idle else {
        return;
    };
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let evicted = pool.cleanup_idle(max_idle).await;
        if evicted > 0 {
            let state = pool.state();
            debug!("idle pool sweep";
                "evicted" => evicted,
                "connections" => state.connections,
                "idle_connections" => state.idle_connections);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydrogen_db_common::{ConnectionHandle, EngineKind, QueryRequest};

    #[tokio::test]
    async fn run_idle_sweeper_noop_without_max_idle() {
        let pool = Arc::new(ConnectionPool::new(4));
        let conn = Arc::new(ConnectionHandle::new(EngineKind::Sqlite, "DB-SQLITE-t", 10));
        pool.insert("h1", Arc::clone(&conn)).await;
        pool.release(&conn).await;

        let sweeper = tokio::spawn(run_idle_sweeper(Arc::clone(&pool), Duration::from_millis(10), None));
        tokio::time::sleep(Duration::from_millis(30)).await;
        sweeper.abort();
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn worker_loop_exits_when_shutdown_requested_and_queue_drained() {
        let worker = DatabaseQueue::new_worker(
            "db",
            "conn",
            EngineKind::Sqlite,
            "DB-SQLITE-db-fast",
            crate::queue::QueueType::Fast,
        )
        .unwrap();
        worker.shutdown_requested.store(true, Ordering::Release);

        struct NoopAdapter;
        #[async_trait::async_trait]
        impl EngineAdapter for NoopAdapter {
            fn kind(&self) -> EngineKind {
                EngineKind::Sqlite
            }
            fn name(&self) -> &'static str {
                "noop"
            }
            async fn connect(
                &self,
                _config: &ConnectionConfig,
                designator: &str,
            ) -> Result<Arc<ConnectionHandle>, hydrogen_db_common::DbError> {
                Ok(Arc::new(ConnectionHandle::new(EngineKind::Sqlite, designator, 10)))
            }
            async fn disconnect(&self, _handle: &ConnectionHandle) -> Result<(), hydrogen_db_common::DbError> {
                Ok(())
            }
            async fn health_check(&self, _handle: &ConnectionHandle) -> Result<bool, hydrogen_db_common::DbError> {
                Ok(true)
            }
            async fn reset(&self, _handle: &ConnectionHandle) -> Result<(), hydrogen_db_common::DbError> {
                Ok(())
            }
            async fn execute(&self, _handle: &ConnectionHandle, _request: &QueryRequest) -> QueryResult {
                QueryResult::failure("unreachable")
            }
            async fn execute_prepared(
                &self,
                _handle: &ConnectionHandle,
                _stmt_name: &str,
                _request: &QueryRequest,
            ) -> QueryResult {
                QueryResult::failure("unreachable")
            }
            async fn begin_tx(
                &self,
                _handle: &ConnectionHandle,
                _isolation: Option<&str>,
            ) -> Result<hydrogen_db_common::Transaction, hydrogen_db_common::DbError> {
                unimplemented!()
            }
            async fn commit_tx(&self, _handle: &ConnectionHandle) -> Result<(), hydrogen_db_common::DbError> {
                Ok(())
            }
            async fn rollback_tx(&self, _handle: &ConnectionHandle) -> Result<(), hydrogen_db_common::DbError> {
                Ok(())
            }
            async fn prepare(&self, _handle: &ConnectionHandle, _name: &str, _sql: &str) -> Result<(), hydrogen_db_common::DbError> {
                Ok(())
            }
            async fn unprepare(&self, _handle: &ConnectionHandle, _name: &str) -> Result<(), hydrogen_db_common::DbError> {
                Ok(())
            }
            fn build_connection_string(&self, _config: &ConnectionConfig) -> Option<String> {
                None
            }
            fn validate_connection_string(&self, _value: &str) -> bool {
                true
            }
            fn escape_identifier(&self, _handle: &ConnectionHandle, _input: &str) -> Option<String> {
                None
            }
        }

        let pool = Arc::new(ConnectionPool::new(4));
        run_worker_loop(worker, Arc::new(NoopAdapter), pool).await;
    }
}
