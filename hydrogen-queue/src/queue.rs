//! `DatabaseQueue`: a typed work queue, Lead or Worker (spec §3, §4.5).
//!
//! Staged construction (spec: "construction is staged so each stage can
//! fail cleanly... any stage failure rolls back prior stages") maps
//! directly onto Rust ownership: each stage below either returns early via
//! `?` before anything is stored in `self`, or builds a local value handed
//! off only once every later stage has also succeeded. There is nothing to
//! explicitly unwind — a `DatabaseQueue` simply never exists in a
//! partially-built state.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use hydrogen_db_common::{ConnectionHandle, DbError, EngineKind, QueryRequest, QueryResult};
use tokio::sync::{mpsc, oneshot, Mutex, Notify, RwLock};

use crate::qtc::QueryTableCache;

/// A request in flight on a worker queue's FIFO, paired with the channel
/// `submit` waits on for its result. `enqueue` (fire-and-forget, used by the
/// selector's callers that don't need a result) leaves `respond_to` empty.
pub struct WorkItem {
    pub request: QueryRequest,
    pub respond_to: Option<oneshot::Sender<QueryResult>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueType {
    Fast,
    Medium,
    Slow,
    Cache,
}

impl QueueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueType::Fast => "fast",
            QueueType::Medium => "medium",
            QueueType::Slow => "slow",
            QueueType::Cache => "cache",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "fast" => Some(QueueType::Fast),
            "medium" => Some(QueueType::Medium),
            "slow" => Some(QueueType::Slow),
            "cache" => Some(QueueType::Cache),
            _ => None,
        }
    }
}

/// Fields exclusive to the Lead queue of a database (spec §3).
#[derive(Debug)]
pub struct LeadState {
    pub children: RwLock<Vec<Arc<DatabaseQueue>>>,
    pub qtc: Mutex<QueryTableCache>,
    pub persistent_connection: Mutex<Option<Arc<ConnectionHandle>>>,
    pub bootstrap_completed: AtomicBool,
    pub empty_database: AtomicBool,
    pub orphaned_table_dropped: AtomicBool,
    pub initial_connection_attempted: AtomicBool,
    /// Wakes `wait_for_initial_connection` waiters once the first connect
    /// attempt (success or failure) has happened.
    pub bootstrap_cond: Notify,
}

impl LeadState {
    fn new() -> Self {
        Self {
            children: RwLock::new(Vec::new()),
            qtc: Mutex::new(QueryTableCache::new()),
            persistent_connection: Mutex::new(None),
            bootstrap_completed: AtomicBool::new(false),
            empty_database: AtomicBool::new(false),
            orphaned_table_dropped: AtomicBool::new(false),
            initial_connection_attempted: AtomicBool::new(false),
            bootstrap_cond: Notify::new(),
        }
    }
}

#[derive(Debug)]
pub struct DatabaseQueue {
    pub database_name: String,
    pub connection_string: String,
    pub engine_kind: EngineKind,
    pub designator: String,
    pub queue_type: Option<QueueType>,
    pub is_lead: bool,

    sender: mpsc::UnboundedSender<WorkItem>,
    receiver: Mutex<mpsc::UnboundedReceiver<WorkItem>>,
    depth: AtomicUsize,
    /// Unix millis; sole writer is the selector (spec §4.5).
    last_request_time: AtomicI64,
    pub shutdown_requested: AtomicBool,
    last_connection_attempt: AtomicI64,
    last_heartbeat: AtomicI64,

    pub lead: Option<LeadState>,
}

impl DatabaseQueue {
    /// Stage 1+2 combined: validates the two fields spec §7 calls fatal to
    /// construction (`database_name`, `connection_string` both required
    /// non-empty), then builds the rest. `queue_type` is `None` for a Lead
    /// queue and `Some` for a worker.
    fn build(
        database_name: impl Into<String>,
        connection_string: impl Into<String>,
        engine_kind: EngineKind,
        designator: impl Into<String>,
        queue_type: Option<QueueType>,
        is_lead: bool,
    ) -> Result<Self, DbError> {
        let database_name = database_name.into();
        let connection_string = connection_string.into();
        if database_name.is_empty() {
            return Err(DbError::parameter_invalid("database_name must be non-empty"));
        }
        if connection_string.is_empty() {
            return Err(DbError::parameter_invalid(
                "connection_string must be non-empty",
            ));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        Ok(Self {
            database_name,
            connection_string,
            engine_kind,
            designator: designator.into(),
            queue_type,
            is_lead,
            sender,
            receiver: Mutex::new(receiver),
            depth: AtomicUsize::new(0),
            last_request_time: AtomicI64::new(0),
            shutdown_requested: AtomicBool::new(false),
            last_connection_attempt: AtomicI64::new(0),
            last_heartbeat: AtomicI64::new(0),
            lead: if is_lead { Some(LeadState::new()) } else { None },
        })
    }

    pub fn new_lead(
        database_name: impl Into<String>,
        connection_string: impl Into<String>,
        engine_kind: EngineKind,
        designator: impl Into<String>,
    ) -> Result<Arc<Self>, DbError> {
        Ok(Arc::new(Self::build(
            database_name,
            connection_string,
            engine_kind,
            designator,
            None,
            true,
        )?))
    }

    pub fn new_worker(
        database_name: impl Into<String>,
        connection_string: impl Into<String>,
        engine_kind: EngineKind,
        designator: impl Into<String>,
        queue_type: QueueType,
    ) -> Result<Arc<Self>, DbError> {
        Ok(Arc::new(Self::build(
            database_name,
            connection_string,
            engine_kind,
            designator,
            Some(queue_type),
            false,
        )?))
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn last_request_time_millis(&self) -> i64 {
        self.last_request_time.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub fn last_request_time_for_test(&self, millis: i64) {
        self.last_request_time.store(millis, Ordering::Release);
    }

    /// Only the selector calls this (spec §4.5: "the selector is the sole
    /// writer to `last_request_time`").
    pub fn touch_last_request_time(&self) {
        self.last_request_time.store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    pub fn last_connection_attempt(&self) -> i64 {
        self.last_connection_attempt.load(Ordering::Acquire)
    }

    pub fn record_connection_attempt(&self) {
        self.last_connection_attempt
            .store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    pub fn record_heartbeat(&self) {
        self.last_heartbeat
            .store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    /// Fire-and-forget enqueue: no one waits on the result. Used by tests
    /// and by callers that only care about queue depth/ordering.
    pub fn enqueue(&self, request: QueryRequest) -> Result<(), DbError> {
        self.enqueue_item(WorkItem {
            request,
            respond_to: None,
        })
    }

    fn enqueue_item(&self, item: WorkItem) -> Result<(), DbError> {
        self.sender
            .send(item)
            .map_err(|_| DbError::connection_lost("queue is closed"))?;
        self.depth.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Enqueues `request` and awaits the worker loop's result (spec §4.5's
    /// dispatch-then-respond path). Fails if the queue is closed or the
    /// worker drops the request without responding (e.g. shutdown).
    pub async fn submit(&self, request: QueryRequest) -> Result<QueryResult, DbError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue_item(WorkItem {
            request,
            respond_to: Some(tx),
        })?;
        rx.await
            .map_err(|_| DbError::connection_lost("worker dropped the request"))
    }

    pub async fn dequeue(&self) -> Option<WorkItem> {
        let mut receiver = self.receiver.lock().await;
        let item = receiver.recv().await;
        if item.is_some() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        item
    }

    /// Rejected for non-lead queues and when shutdown is already in
    /// progress (spec §4.5).
    pub async fn spawn_child(
        self: &Arc<Self>,
        queue_type: QueueType,
    ) -> Result<Arc<DatabaseQueue>, DbError> {
        if !self.is_lead {
            return Err(DbError::parameter_invalid("spawn_child requires a lead queue"));
        }
        if self.shutdown_requested.load(Ordering::Acquire) {
            return Err(DbError::parameter_invalid("shutdown already in progress"));
        }
        let lead = self.lead.as_ref().expect("is_lead implies lead state");
        let designator = format!("{}-{}", self.designator, queue_type.as_str());
        let child = Self::new_worker(
            self.database_name.clone(),
            self.connection_string.clone(),
            self.engine_kind,
            designator,
            queue_type,
        )?;
        lead.children.write().await.push(Arc::clone(&child));
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_rejects_empty_database_name() {
        let err = DatabaseQueue::new_lead("", "conn", EngineKind::Sqlite, "DB-SQLITE-x").unwrap_err();
        assert!(format!("{}", err).contains("parameter"));
    }

    #[test]
    fn build_rejects_empty_connection_string() {
        let err =
            DatabaseQueue::new_lead("db", "", EngineKind::Sqlite, "DB-SQLITE-x").unwrap_err();
        assert!(format!("{}", err).contains("parameter"));
    }

    #[tokio::test]
    async fn spawn_child_rejected_for_worker_queue() {
        let worker = DatabaseQueue::new_worker(
            "db",
            "conn",
            EngineKind::Sqlite,
            "DB-SQLITE-db-fast",
            QueueType::Fast,
        )
        .unwrap();
        assert!(worker.spawn_child(QueueType::Slow).await.is_err());
    }

    #[tokio::test]
    async fn spawn_child_rejected_during_shutdown() {
        let lead = DatabaseQueue::new_lead("db", "conn", EngineKind::Sqlite, "DB-SQLITE-db").unwrap();
        lead.shutdown_requested.store(true, Ordering::Release);
        assert!(lead.spawn_child(QueueType::Fast).await.is_err());
    }

    #[tokio::test]
    async fn submit_returns_the_responders_result() {
        let worker = DatabaseQueue::new_worker(
            "db",
            "conn",
            EngineKind::Sqlite,
            "DB-SQLITE-db-fast",
            QueueType::Fast,
        )
        .unwrap();

        let responder = Arc::clone(&worker);
        tokio::spawn(async move {
            let item = responder.dequeue().await.unwrap();
            let respond_to = item.respond_to.unwrap();
            let _ = respond_to.send(hydrogen_db_common::QueryResult::success(
                "[]".to_owned(),
                0,
                0,
                std::time::Duration::default(),
                0,
            ));
        });

        let result = worker.submit(QueryRequest::new("q1", "select 1")).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn submit_fails_if_worker_drops_request_without_responding() {
        let worker = DatabaseQueue::new_worker(
            "db",
            "conn",
            EngineKind::Sqlite,
            "DB-SQLITE-db-fast",
            QueueType::Fast,
        )
        .unwrap();

        let drainer = Arc::clone(&worker);
        tokio::spawn(async move {
            let _item = drainer.dequeue().await.unwrap();
            // respond_to dropped here without a send.
        });

        assert!(worker.submit(QueryRequest::new("q1", "select 1")).await.is_err());
    }

    #[tokio::test]
    async fn enqueue_dequeue_tracks_depth() {
        let lead = DatabaseQueue::new_lead("db", "conn", EngineKind::Sqlite, "DB-SQLITE-db").unwrap();
        lead.enqueue(QueryRequest::new("q1", "select 1")).unwrap();
        assert_eq!(lead.depth(), 1);
        let got = lead.dequeue().await;
        assert!(got.is_some());
        assert_eq!(lead.depth(), 0);
    }
}
