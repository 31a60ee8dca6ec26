//! `DatabaseQueueManager`: the fleet of Lead queues and their spawned
//! workers, plus the selector algorithm (spec §3, §4.5).

use std::collections::HashMap;
use std::sync::Arc;

use hydrogen_db_common::{DbError, QueryRequest, QueryResult};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::queue::{DatabaseQueue, QueueType};

#[derive(Default)]
pub struct DatabaseQueueManager {
    leads: RwLock<HashMap<String, Arc<DatabaseQueue>>>,
}

impl DatabaseQueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_lead(&self, lead: Arc<DatabaseQueue>) {
        self.leads.write().await.insert(lead.database_name.clone(), lead);
    }

    pub async fn lead(&self, database_name: &str) -> Option<Arc<DatabaseQueue>> {
        self.leads.read().await.get(database_name).cloned()
    }

    /// Flattens every lead plus its worker children into one list, used by
    /// the selector and by count-and-type accessors.
    async fn all_queues(&self) -> Vec<Arc<DatabaseQueue>> {
        let leads = self.leads.read().await;
        let mut all = Vec::new();
        for lead in leads.values() {
            all.push(Arc::clone(lead));
            if let Some(state) = &lead.lead {
                all.extend(state.children.read().await.iter().cloned());
            }
        }
        all
    }

    /// Lowest-depth-then-oldest-request-time selection among every worker
    /// queue matching `(database_name, queue_type)`. Returns `None` when no
    /// queue matches (spec §4.5). Bumps the winner's `last_request_time`.
    pub async fn select(
        &self,
        database_name: &str,
        queue_type: QueueType,
    ) -> Option<Arc<DatabaseQueue>> {
        let candidates = self.all_queues().await;
        let mut best: Option<Arc<DatabaseQueue>> = None;
        for q in candidates {
            if q.database_name != database_name || q.queue_type != Some(queue_type) {
                continue;
            }
            best = Some(match best {
                None => q,
                Some(current) => {
                    if q.depth() < current.depth()
                        || (q.depth() == current.depth()
                            && q.last_request_time_millis() < current.last_request_time_millis())
                    {
                        q
                    } else {
                        current
                    }
                }
            });
        }
        if let Some(winner) = &best {
            winner.touch_last_request_time();
        }
        best
    }

    /// Runs a single query end to end: resolves `query_ref` against the
    /// database's QTC, selects a worker queue for `queue_type`, and submits
    /// the bound request to it (spec §3's data-flow: selector maps
    /// `(database, queue_type)` to a worker queue, the worker looks
    /// `query_ref` up in the QTC, binds parameters, and executes).
    pub async fn dispatch(
        &self,
        database_name: &str,
        queue_type: QueueType,
        query_ref: i64,
        parameters: Value,
    ) -> Result<QueryResult, DbError> {
        let lead = self
            .lead(database_name)
            .await
            .ok_or_else(|| DbError::parameter_invalid(format!("no such database {}", database_name)))?;
        let lead_state = lead
            .lead
            .as_ref()
            .expect("a registered lead always carries LeadState");

        let (sql_template, timeout_seconds, query_id) = {
            let mut qtc = lead_state.qtc.lock().await;
            let entry = qtc
                .lookup(query_ref)
                .ok_or_else(|| DbError::parameter_invalid(format!("unknown query_ref {}", query_ref)))?;
            (
                entry.sql_template.clone(),
                entry.timeout_seconds,
                entry.query_ref.to_string(),
            )
        };

        let worker = self.select(database_name, queue_type).await.ok_or_else(|| {
            DbError::connection_lost(format!(
                "no {} worker queue for database {}",
                queue_type.as_str(),
                database_name
            ))
        })?;

        let mut request = QueryRequest::new(query_id, sql_template);
        request.parameters = parameters;
        request.timeout = std::time::Duration::from_secs(timeout_seconds as u64);

        worker.submit(request).await
    }

    /// Total queue count per `QueueType`, across every database.
    pub async fn counts_by_type(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        for q in self.all_queues().await {
            if let Some(qt) = q.queue_type {
                *counts.entry(qt.as_str()).or_insert(0) += 1;
            }
        }
        counts
    }

    pub async fn shutdown_all(&self) {
        for q in self.all_queues().await {
            q.shutdown_requested.store(true, std::sync::atomic::Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydrogen_db_common::EngineKind;

    #[tokio::test]
    async fn selector_returns_none_when_no_queue_matches() {
        let manager = DatabaseQueueManager::new();
        assert!(manager.select("missing", QueueType::Fast).await.is_none());
    }

    #[tokio::test]
    async fn selector_breaks_ties_by_oldest_request_time() {
        let lead = DatabaseQueue::new_lead("testdb", "conn", EngineKind::Sqlite, "DB-SQLITE-testdb").unwrap();
        let manager = DatabaseQueueManager::new();
        manager.register_lead(Arc::clone(&lead)).await;

        let q1 = lead.spawn_child(QueueType::Fast).await.unwrap();
        let q2 = lead.spawn_child(QueueType::Fast).await.unwrap();
        q1.enqueue(hydrogen_db_common::QueryRequest::new("a", "select 1")).unwrap();
        q2.enqueue(hydrogen_db_common::QueryRequest::new("b", "select 1")).unwrap();

        q1.last_request_time_for_test(1000);
        q2.last_request_time_for_test(2000);

        let winner = manager.select("testdb", QueueType::Fast).await.unwrap();
        assert_eq!(winner.designator, q1.designator);
    }

    #[tokio::test]
    async fn selector_prefers_lower_depth() {
        let lead = DatabaseQueue::new_lead("testdb", "conn", EngineKind::Sqlite, "DB-SQLITE-testdb").unwrap();
        let manager = DatabaseQueueManager::new();
        manager.register_lead(Arc::clone(&lead)).await;

        let shallow = lead.spawn_child(QueueType::Slow).await.unwrap();
        let deep = lead.spawn_child(QueueType::Slow).await.unwrap();
        deep.enqueue(hydrogen_db_common::QueryRequest::new("a", "select 1")).unwrap();
        deep.enqueue(hydrogen_db_common::QueryRequest::new("b", "select 1")).unwrap();

        let winner = manager.select("testdb", QueueType::Slow).await.unwrap();
        assert_eq!(winner.designator, shallow.designator);
    }

    #[tokio::test]
    async fn dispatch_resolves_query_ref_and_submits_to_a_worker() {
        use crate::qtc::{PreferredQueueType, QueryCacheEntry};

        let lead = DatabaseQueue::new_lead("testdb", "conn", EngineKind::Sqlite, "DB-SQLITE-testdb").unwrap();
        let manager = DatabaseQueueManager::new();
        manager.register_lead(Arc::clone(&lead)).await;
        lead.lead
            .as_ref()
            .unwrap()
            .qtc
            .lock()
            .await
            .add_entry(QueryCacheEntry::new(7, 0, "select 1", "", PreferredQueueType::Fast, 5))
            .unwrap();

        let worker = lead.spawn_child(QueueType::Fast).await.unwrap();
        let responder = Arc::clone(&worker);
        tokio::spawn(async move {
            let item = responder.dequeue().await.unwrap();
            assert_eq!(item.request.sql_or_prepared_name, "select 1");
            let respond_to = item.respond_to.unwrap();
            let _ = respond_to.send(hydrogen_db_common::QueryResult::success(
                "[]".to_owned(),
                0,
                0,
                std::time::Duration::default(),
                0,
            ));
        });

        let result = manager
            .dispatch("testdb", QueueType::Fast, 7, serde_json::Value::Null)
            .await
            .unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn dispatch_fails_for_unknown_query_ref() {
        let lead = DatabaseQueue::new_lead("testdb", "conn", EngineKind::Sqlite, "DB-SQLITE-testdb").unwrap();
        let manager = DatabaseQueueManager::new();
        manager.register_lead(Arc::clone(&lead)).await;
        lead.spawn_child(QueueType::Fast).await.unwrap();

        let err = manager
            .dispatch("testdb", QueueType::Fast, 99, serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(format!("{}", err).contains("99"));
    }
}
