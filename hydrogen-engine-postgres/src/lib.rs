//! PostgreSQL `EngineAdapter`, grounded on `syncstorage-postgres/src/pool.rs`
//! — the one teacher backend already wired for a genuinely async driver
//! (`diesel-async`'s `AsyncPgConnection`), so unlike the sqlite/mysql
//! adapters this one needs no `BlockingThreadpool` hop.

#[macro_use]
extern crate slog_scope;

use std::sync::Arc;

use async_trait::async_trait;
use diesel::deserialize::{self, QueryableByName};
use diesel::pg::Pg;
use diesel::row::{Field, Row};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl, SimpleAsyncConnection};
use hydrogen_db_common::{
    CellValue, ConnectionConfig, ConnectionHandle, DbError, EngineAdapter, EngineKind,
    PreparedStatement, QueryRequest, QueryResult, Transaction,
};
use once_cell::sync::Lazy;
use regex::Regex;

static URL_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^postgresql://").unwrap());

/// One result row, read back generically by column position rather than a
/// compile-time-known struct, since the adapter has no idea ahead of time
/// what a caller's raw SQL or QTC template selects.
struct DynamicRow(Vec<CellValue>);

impl QueryableByName<Pg> for DynamicRow {
    fn build<'a>(row: &impl Row<'a, Pg>) -> deserialize::Result<Self> {
        let mut cells = Vec::with_capacity(row.field_count());
        for idx in 0..row.field_count() {
            let field = row.get(idx).ok_or("postgres row field vanished mid-read")?;
            let column_name = field.field_name().unwrap_or("").to_owned();
            let value = match field.is_null() {
                true => None,
                false => field
                    .value()
                    .map(|raw| String::from_utf8_lossy(raw.as_bytes()).into_owned()),
            };
            cells.push(CellValue {
                column_name,
                value,
                is_numeric: false,
            });
        }
        Ok(DynamicRow(cells))
    }
}

#[derive(Default)]
pub struct PostgresAdapter;

impl PostgresAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EngineAdapter for PostgresAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::PostgreSql
    }

    fn name(&self) -> &'static str {
        "postgresql"
    }

    async fn connect(
        &self,
        config: &ConnectionConfig,
        designator: &str,
    ) -> Result<Arc<ConnectionHandle>, DbError> {
        let url = self
            .build_connection_string(config)
            .ok_or_else(|| DbError::parameter_invalid("postgres connect requires a connection string"))?;
        let conn = AsyncPgConnection::establish(&url)
            .await
            .map_err(|e| DbError::backend_protocol(format!("postgres connect failed: {}", e)))?;

        let handle = Arc::new(ConnectionHandle::new(
            EngineKind::PostgreSql,
            designator,
            config.resolved_cache_capacity(),
        ));
        handle.mark_connected(Box::new(conn)).await;
        Ok(handle)
    }

    async fn disconnect(&self, handle: &ConnectionHandle) -> Result<(), DbError> {
        handle.mark_disconnected().await;
        Ok(())
    }

    async fn health_check(&self, handle: &ConnectionHandle) -> Result<bool, DbError> {
        let mut inner = handle.lock().await;
        let Some(native) = inner.native.as_mut() else {
            return Ok(false);
        };
        let conn = native
            .downcast_mut::<AsyncPgConnection>()
            .ok_or_else(|| DbError::parameter_invalid("connection kind mismatch"))?;
        let ok = conn.batch_execute("SELECT 1").await.is_ok();
        drop(inner);
        handle.touch_health_check().await;
        Ok(ok)
    }

    async fn reset(&self, handle: &ConnectionHandle) -> Result<(), DbError> {
        let mut inner = handle.lock().await;
        if let Some(tx) = inner.transaction.take() {
            if tx.active {
                if let Some(native) = inner.native.as_mut() {
                    if let Some(conn) = native.downcast_mut::<AsyncPgConnection>() {
                        let _ = conn.batch_execute("ROLLBACK").await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn execute(&self, handle: &ConnectionHandle, request: &QueryRequest) -> QueryResult {
        let start = std::time::Instant::now();
        let mut inner = handle.lock().await;
        let Some(native) = inner.native.as_mut() else {
            return QueryResult::failure("not connected");
        };
        let Some(conn) = native.downcast_mut::<AsyncPgConnection>() else {
            return QueryResult::failure("connection kind mismatch");
        };

        match diesel::sql_query(&request.sql_or_prepared_name)
            .load::<DynamicRow>(conn)
            .await
        {
            Ok(rows) => {
                let column_count = rows.as_slice().first().map_or(0, |r| r.0.len());
                let row_count = rows.len();
                let raw_rows: Vec<Vec<CellValue>> = rows.into_iter().map(|r| r.0).collect();
                let rows_json = match hydrogen_db_common::rows_to_json(&raw_rows) {
                    Ok(json) => json,
                    Err(e) => return QueryResult::failure(format!("{}", e)),
                };
                // `load` reads back rows rather than a command tag, so a
                // non-RETURNING UPDATE/DELETE reports 0 here instead of its
                // true affected count; every row-returning query (SELECT,
                // INSERT/UPDATE/DELETE ... RETURNING) is exact.
                QueryResult::success(rows_json, row_count, column_count, start.elapsed(), row_count as u64)
            }
            Err(e) => QueryResult::failure(format!("postgres execute failed: {}", e)),
        }
    }

    async fn execute_prepared(
        &self,
        handle: &ConnectionHandle,
        stmt_name: &str,
        request: &QueryRequest,
    ) -> QueryResult {
        let sql = {
            let mut inner = handle.lock().await;
            if !inner.prepared.touch(stmt_name) {
                return QueryResult::failure(format!("no such prepared statement: {}", stmt_name));
            }
            match inner.prepared.get(stmt_name) {
                Some(stmt) => stmt.sql_template.clone(),
                None => return QueryResult::failure("prepared statement vanished"),
            }
        };
        let mut delegated = request.clone();
        delegated.sql_or_prepared_name = sql;
        EngineAdapter::execute(self, handle, &delegated).await
    }

    async fn begin_tx(
        &self,
        handle: &ConnectionHandle,
        isolation: Option<&str>,
    ) -> Result<Transaction, DbError> {
        let mut inner = handle.lock().await;
        let native = inner
            .native
            .as_mut()
            .ok_or_else(|| DbError::connection_lost("not connected"))?;
        let conn = native
            .downcast_mut::<AsyncPgConnection>()
            .ok_or_else(|| DbError::parameter_invalid("connection kind mismatch"))?;
        let begin_stmt = match isolation {
            Some(level) => format!("BEGIN ISOLATION LEVEL {}", level),
            None => "BEGIN".to_owned(),
        };
        conn.batch_execute(&begin_stmt)
            .await
            .map_err(|e| DbError::backend_protocol(format!("BEGIN failed: {}", e)))?;
        let tx = Transaction::new(next_tx_id(), isolation.map(|s| s.to_owned()));
        inner.transaction = Some(tx.clone());
        Ok(tx)
    }

    async fn commit_tx(&self, handle: &ConnectionHandle) -> Result<(), DbError> {
        let mut inner = handle.lock().await;
        let native = inner
            .native
            .as_mut()
            .ok_or_else(|| DbError::connection_lost("not connected"))?;
        let conn = native
            .downcast_mut::<AsyncPgConnection>()
            .ok_or_else(|| DbError::parameter_invalid("connection kind mismatch"))?;
        conn.batch_execute("COMMIT")
            .await
            .map_err(|e| DbError::backend_protocol(format!("COMMIT failed: {}", e)))?;
        inner.transaction = None;
        Ok(())
    }

    async fn rollback_tx(&self, handle: &ConnectionHandle) -> Result<(), DbError> {
        let mut inner = handle.lock().await;
        let native = inner
            .native
            .as_mut()
            .ok_or_else(|| DbError::connection_lost("not connected"))?;
        let conn = native
            .downcast_mut::<AsyncPgConnection>()
            .ok_or_else(|| DbError::parameter_invalid("connection kind mismatch"))?;
        conn.batch_execute("ROLLBACK")
            .await
            .map_err(|e| DbError::backend_protocol(format!("ROLLBACK failed: {}", e)))?;
        inner.transaction = None;
        Ok(())
    }

    async fn prepare(&self, handle: &ConnectionHandle, name: &str, sql: &str) -> Result<(), DbError> {
        if name.is_empty() || sql.is_empty() {
            return Err(DbError::parameter_invalid("prepare requires name and sql"));
        }
        let mut inner = handle.lock().await;
        let stmt = PreparedStatement::new(name, sql);
        let mut dealloc = PgDeallocator;
        inner.prepared.insert(stmt, &mut dealloc).await
    }

    async fn unprepare(&self, handle: &ConnectionHandle, name: &str) -> Result<(), DbError> {
        let mut inner = handle.lock().await;
        let mut dealloc = PgDeallocator;
        inner.prepared.remove(name, &mut dealloc).await.map(|_| ())
    }

    /// Defaults to `postgresql://:@localhost:5432/postgres` with fields
    /// substituted; a full `connection_string` wins verbatim (spec §4.2).
    fn build_connection_string(&self, config: &ConnectionConfig) -> Option<String> {
        if let Some(full) = &config.connection_string {
            if !full.is_empty() {
                return Some(full.clone());
            }
        }
        let host = if config.host.is_empty() { "localhost" } else { &config.host };
        let port = if config.port == 0 { 5432 } else { config.port };
        let database = if config.database.is_empty() { "postgres" } else { &config.database };
        Some(format!(
            "postgresql://{}:{}@{}:{}/{}",
            config.username, config.password, host, port, database
        ))
    }

    fn validate_connection_string(&self, value: &str) -> bool {
        URL_PREFIX.is_match(value)
    }

    fn escape_identifier(&self, handle: &ConnectionHandle, input: &str) -> Option<String> {
        if handle.kind != EngineKind::PostgreSql {
            return None;
        }
        // Delegated to the library per spec §4.2: diesel quotes bind
        // parameters itself, so identifier escaping here only needs to
        // double embedded double-quotes for `quote_ident`-style usage.
        Some(input.replace('"', "\"\""))
    }
}

struct PgDeallocator;

#[async_trait]
impl hydrogen_db_common::StatementDeallocator for PgDeallocator {
    async fn deallocate(&mut self, _stmt: &PreparedStatement) -> Result<(), DbError> {
        Ok(())
    }
}

fn next_tx_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("pg-tx-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_case_sensitive_prefix() {
        let adapter = PostgresAdapter::new();
        assert!(adapter.validate_connection_string("postgresql://"));
        assert!(adapter.validate_connection_string("postgresql://host/db"));
        assert!(!adapter.validate_connection_string("PostgreSQL://host/db"));
        assert!(!adapter.validate_connection_string("mysql://host/db"));
    }

    #[test]
    fn build_connection_string_defaults_match_spec_example() {
        let adapter = PostgresAdapter::new();
        let built = adapter.build_connection_string(&ConnectionConfig::default()).unwrap();
        assert_eq!(built, "postgresql://:@localhost:5432/postgres");
    }

    #[test]
    fn build_connection_string_prefers_full_string() {
        let adapter = PostgresAdapter::new();
        let config = ConnectionConfig {
            connection_string: Some("postgresql://u:p@remote/db".to_owned()),
            ..Default::default()
        };
        assert_eq!(
            adapter.build_connection_string(&config),
            Some("postgresql://u:p@remote/db".to_owned())
        );
    }

    #[tokio::test]
    async fn escape_identifier_rejects_mismatched_kind() {
        let adapter = PostgresAdapter::new();
        let handle = ConnectionHandle::new(EngineKind::Sqlite, "DB-SQLITE-x", 10);
        assert!(adapter.escape_identifier(&handle, "a\"b").is_none());
    }
}
