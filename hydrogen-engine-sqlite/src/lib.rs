//! SQLite `EngineAdapter`, grounded on `syncstorage-sqlite/src/pool.rs` and
//! `syncstorage-sqlite/src/models.rs`. Connections are synchronous diesel
//! `SqliteConnection`s run through `BlockingThreadpool::spawn`, matching the
//! teacher's own `web::block`-around-diesel pattern.

#[macro_use]
extern crate slog_scope;

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use diesel::connection::SimpleConnection;
use diesel::deserialize::{self, QueryableByName};
use diesel::row::{Field, Row};
use diesel::sqlite::{Sqlite, SqliteConnection};
use diesel::{Connection, RunQueryDsl};
use hydrogen_db_common::{
    BlockingThreadpool, CellValue, ConnectionConfig, ConnectionHandle, DbError, EngineAdapter,
    EngineKind, PreparedStatement, QueryRequest, QueryResult, Transaction,
};

/// Mirrors the postgres/mysql adapters' `DynamicRow`: SQLite's dynamic
/// typing means every non-null value's blob representation is also its text
/// representation (`CAST(x AS BLOB)` round-trips through text for anything
/// that isn't already a blob), so `read_blob` doubles as a generic reader.
struct DynamicRow(Vec<CellValue>);

impl QueryableByName<Sqlite> for DynamicRow {
    fn build<'a>(row: &impl Row<'a, Sqlite>) -> deserialize::Result<Self> {
        let mut cells = Vec::with_capacity(row.field_count());
        for idx in 0..row.field_count() {
            let field = row.get(idx).ok_or("sqlite row field vanished mid-read")?;
            let column_name = field.field_name().unwrap_or("").to_owned();
            let value = match field.is_null() {
                true => None,
                false => field
                    .value()
                    .map(|raw| String::from_utf8_lossy(raw.read_blob()).into_owned()),
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

pub struct SqliteAdapter {
    blocking: Arc<BlockingThreadpool>,
}

impl Default for SqliteAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteAdapter {
    pub fn new() -> Self {
        Self {
            blocking: Arc::new(BlockingThreadpool::new()),
        }
    }
}

/// Doubles embedded single quotes, the SQLite `escape_string` contract
/// (spec §4.2). Empty input yields empty output.
fn escape_sqlite_string(input: &str) -> String {
    input.replace('\'', "''")
}

#[async_trait]
impl EngineAdapter for SqliteAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn connect(
        &self,
        config: &ConnectionConfig,
        designator: &str,
    ) -> Result<Arc<ConnectionHandle>, DbError> {
        let path = self
            .build_connection_string(config)
            .ok_or_else(|| DbError::parameter_invalid("sqlite connect requires a database path"))?;
        let blocking = self.blocking.clone();
        let conn = blocking
            .spawn(move || {
                SqliteConnection::establish(&path)
                    .map_err(|e| DbError::backend_protocol(format!("sqlite connect failed: {}", e)))
            })
            .await?;

        let handle = Arc::new(ConnectionHandle::new(
            EngineKind::Sqlite,
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
            .downcast_mut::<SqliteConnection>()
            .ok_or_else(|| DbError::parameter_invalid("connection kind mismatch"))?;
        let ok = conn.batch_execute("SELECT 1").is_ok();
        drop(inner);
        handle.touch_health_check().await;
        Ok(ok)
    }

    async fn reset(&self, handle: &ConnectionHandle) -> Result<(), DbError> {
        let mut inner = handle.lock().await;
        if let Some(tx) = inner.transaction.take() {
            if tx.active {
                if let Some(native) = inner.native.as_mut() {
                    if let Some(conn) = native.downcast_mut::<SqliteConnection>() {
                        let _ = conn.batch_execute("ROLLBACK");
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
        let Some(conn) = native.downcast_mut::<SqliteConnection>() else {
            return QueryResult::failure("connection kind mismatch");
        };

        match diesel::sql_query(&request.sql_or_prepared_name).load::<DynamicRow>(conn) {
            Ok(rows) => {
                let column_count = rows.first().map_or(0, |r| r.0.len());
                let row_count = rows.len();
                let raw_rows: Vec<Vec<CellValue>> = rows.into_iter().map(|r| r.0).collect();
                let rows_json = match hydrogen_db_common::rows_to_json(&raw_rows) {
                    Ok(json) => json,
                    Err(e) => return QueryResult::failure(format!("{}", e)),
                };
                QueryResult::success(rows_json, row_count, column_count, start.elapsed(), row_count as u64)
            }
            Err(e) => QueryResult::failure(format!("sqlite execute failed: {}", e)),
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
        self.execute(handle, &delegated).await
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
            .downcast_mut::<SqliteConnection>()
            .ok_or_else(|| DbError::parameter_invalid("connection kind mismatch"))?;
        conn.batch_execute("BEGIN")
            .map_err(|e| DbError::backend_protocol(format!("BEGIN failed: {}", e)))?;
        let tx = Transaction::new(uuid_like(), isolation.map(|s| s.to_owned()));
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
            .downcast_mut::<SqliteConnection>()
            .ok_or_else(|| DbError::parameter_invalid("connection kind mismatch"))?;
        conn.batch_execute("COMMIT")
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
            .downcast_mut::<SqliteConnection>()
            .ok_or_else(|| DbError::parameter_invalid("connection kind mismatch"))?;
        conn.batch_execute("ROLLBACK")
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
        let mut dealloc = NoopSqliteDeallocator;
        inner.prepared.insert(stmt, &mut dealloc).await
    }

    async fn unprepare(&self, handle: &ConnectionHandle, name: &str) -> Result<(), DbError> {
        let mut inner = handle.lock().await;
        let mut dealloc = NoopSqliteDeallocator;
        inner.prepared.remove(name, &mut dealloc).await.map(|_| ())
    }

    fn build_connection_string(&self, config: &ConnectionConfig) -> Option<String> {
        if let Some(full) = &config.connection_string {
            if !full.is_empty() {
                return Some(full.clone());
            }
        }
        if config.database.is_empty() {
            return None;
        }
        Some(config.database.clone())
    }

    fn validate_connection_string(&self, value: &str) -> bool {
        !value.is_empty()
    }

    fn escape_identifier(&self, handle: &ConnectionHandle, input: &str) -> Option<String> {
        if handle.kind != EngineKind::Sqlite {
            return None;
        }
        Some(escape_sqlite_string(input))
    }
}

/// SQLite has no server-side DEALLOCATE; diesel re-prepares per call, so
/// cache eviction here is pure bookkeeping.
struct NoopSqliteDeallocator;

#[async_trait]
impl hydrogen_db_common::StatementDeallocator for NoopSqliteDeallocator {
    async fn deallocate(&mut self, _stmt: &PreparedStatement) -> Result<(), DbError> {
        Ok(())
    }
}

fn uuid_like() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("sqlite-tx-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_doubles_single_quotes() {
        assert_eq!(escape_sqlite_string("O'Brien"), "O''Brien");
        assert_eq!(escape_sqlite_string(""), "");
        assert_eq!(escape_sqlite_string("no quotes"), "no quotes");
    }

    #[tokio::test]
    async fn escape_identifier_rejects_mismatched_kind() {
        let adapter = SqliteAdapter::new();
        let handle = ConnectionHandle::new(EngineKind::MySql, "DB-MYSQL-x", 10);
        assert!(adapter.escape_identifier(&handle, "a'b").is_none());
    }

    #[test]
    fn build_connection_string_prefers_full_string() {
        let adapter = SqliteAdapter::new();
        let mut config = ConnectionConfig {
            database: "ignored.db".to_owned(),
            ..Default::default()
        };
        config.connection_string = Some(":memory:".to_owned());
        assert_eq!(
            adapter.build_connection_string(&config),
            Some(":memory:".to_owned())
        );
    }

    #[test]
    fn build_connection_string_falls_back_to_database_field() {
        let adapter = SqliteAdapter::new();
        let config = ConnectionConfig {
            database: "hydrogen.db".to_owned(),
            ..Default::default()
        };
        assert_eq!(
            adapter.build_connection_string(&config),
            Some("hydrogen.db".to_owned())
        );
    }

    #[test]
    fn build_connection_string_rejects_empty() {
        let adapter = SqliteAdapter::new();
        assert_eq!(adapter.build_connection_string(&ConnectionConfig::default()), None);
    }
}
