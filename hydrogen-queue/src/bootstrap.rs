//! Bootstrap & QTC Loader: runs once per Lead queue on its first successful
//! connection (spec §4.7).

use hydrogen_db_common::{DbError, EngineAdapter, QueryRequest, QueryResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

use crate::qtc::{PreferredQueueType, QueryCacheEntry};
use crate::queue::DatabaseQueue;

/// Matches `FROM <table>` case-insensitively on a word boundary, capturing
/// up to the next whitespace or `WHERE` (spec §4.7).
static FROM_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bFROM\s+([A-Za-z0-9_\.]+)").unwrap());

pub struct BootstrapOutcome {
    pub empty_database: bool,
    pub orphaned_table_dropped: bool,
}

/// Runs the full bootstrap protocol against `queue`'s persistent connection.
/// Always leaves `bootstrap_completed == true` and wakes
/// `wait_for_initial_connection` waiters, regardless of which branch below
/// was taken — the quantified invariant from spec §8.
pub async fn run_bootstrap(
    queue: &Arc<DatabaseQueue>,
    adapter: &dyn EngineAdapter,
    bootstrap_query: &str,
) -> Result<BootstrapOutcome, DbError> {
    let lead = queue
        .lead
        .as_ref()
        .ok_or_else(|| DbError::parameter_invalid("bootstrap requires a lead queue"))?;

    let outcome = (async {
        let connection = lead.persistent_connection.lock().await.clone();
        let Some(connection) = connection else {
            return BootstrapOutcome {
                empty_database: false,
                orphaned_table_dropped: false,
            };
        };

        let request = QueryRequest::new("bootstrap", bootstrap_query);
        let result = adapter.execute(&connection, &request).await;

        if !result.success || result.row_count == 0 {
            lead.empty_database.store(true, std::sync::atomic::Ordering::Release);
            let dropped = match extract_from_table(bootstrap_query) {
                Some(table) => {
                    let drop_request = QueryRequest::new("bootstrap-drop", format!("DROP TABLE {}", table));
                    adapter.execute(&connection, &drop_request).await.success
                }
                None => false,
            };
            lead.orphaned_table_dropped
                .store(dropped, std::sync::atomic::Ordering::Release);
            return BootstrapOutcome {
                empty_database: true,
                orphaned_table_dropped: dropped,
            };
        }

        load_qtc(queue, &result).await;
        BootstrapOutcome {
            empty_database: false,
            orphaned_table_dropped: false,
        }
    })
    .await;

    lead.bootstrap_completed.store(true, std::sync::atomic::Ordering::Release);
    lead.initial_connection_attempted
        .store(true, std::sync::atomic::Ordering::Release);
    lead.bootstrap_cond.notify_waiters();

    Ok(outcome)
}

fn extract_from_table(query: &str) -> Option<String> {
    let captured = FROM_TABLE.captures(query)?.get(1)?.as_str();
    Some(captured.trim_end_matches(|c: char| c == ';').to_owned())
}

/// Parses a non-empty bootstrap result as a JSON array of row objects,
/// populating the queue's QTC. Malformed JSON or a non-array root leaves
/// the QTC empty but is not itself a bootstrap failure (spec §4.7 step 3).
async fn load_qtc(queue: &Arc<DatabaseQueue>, result: &QueryResult) {
    let lead = queue.lead.as_ref().expect("checked by caller");

    let Ok(parsed) = serde_json::from_str::<Value>(&result.rows_json) else {
        return;
    };
    let Some(rows) = parsed.as_array() else {
        return;
    };

    let mut qtc = lead.qtc.lock().await;
    for row in rows {
        let Some(entry) = parse_entry(row) else {
            continue;
        };
        // Entry-add failure (duplicate query_ref) aborts only this entry.
        let _ = qtc.add_entry(entry);
    }
}

fn parse_entry(row: &Value) -> Option<QueryCacheEntry> {
    let query_ref = row.get("ref")?.as_i64()?;
    let query = row.get("query")?.as_str()?.to_owned();
    let name = row.get("name").and_then(|v| v.as_str()).unwrap_or("").to_owned();
    let queue_value = row.get("queue").and_then(|v| v.as_i64()).unwrap_or(-1);
    let timeout = row.get("timeout").and_then(|v| v.as_i64()).unwrap_or(30);
    let query_type = row.get("type").and_then(|v| v.as_i64()).unwrap_or(0);

    Some(QueryCacheEntry::new(
        query_ref,
        query_type,
        query,
        name,
        PreferredQueueType::from_bootstrap_value(queue_value),
        timeout as u32,
    ))
}
