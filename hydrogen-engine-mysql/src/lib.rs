//! MySQL `EngineAdapter`, grounded on `syncstorage-mysql/src/pool.rs`, which
//! wires `diesel_async::AsyncMysqlConnection` through a deadpool-managed
//! pool. Hydrogen owns its own `ConnectionPool` (spec §4.3), so only the
//! connection-level shape is adapted here, not the pool itself.

#[macro_use]
extern crate slog_scope;

use std::sync::Arc;

use async_trait::async_trait;
use diesel::deserialize::{self, QueryableByName};
use diesel::mysql::Mysql;
use diesel::row::{Field, Row};
use diesel_async::{AsyncConnection, AsyncMysqlConnection, RunQueryDsl, SimpleAsyncConnection};
use hydrogen_db_common::{
    CellValue, ConnectionConfig, ConnectionHandle, DbError, EngineAdapter, EngineKind,
    PreparedStatement, QueryRequest, QueryResult, Transaction,
};
use once_cell::sync::Lazy;
use regex::Regex;

static URL_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^mysql://").unwrap());

/// Mirrors `hydrogen-engine-postgres`'s `DynamicRow`: reads back whatever
/// columns the query happens to select instead of a fixed struct shape.
struct DynamicRow(Vec<CellValue>);

impl QueryableByName<Mysql> for DynamicRow {
    fn build<'a>(row: &impl Row<'a, Mysql>) -> deserialize::Result<Self> {
        let mut cells = Vec::with_capacity(row.field_count());
        for idx in 0..row.field_count() {
            let field = row.get(idx).ok_or("mysql row field vanished mid-read")?;
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
pub struct MysqlAdapter;

impl MysqlAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EngineAdapter for MysqlAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::MySql
    }

    fn name(&self) -> &'static str {
        "mysql"
    }

    async fn connect(
        &self,
        config: &ConnectionConfig,
        designator: &str,
    ) -> Result<Arc<ConnectionHandle>, DbError> {
        let url = self
            .build_connection_string(config)
            .ok_or_else(|| DbError::parameter_invalid("mysql connect requires a connection string"))?;
        let conn = AsyncMysqlConnection::establish(&url)
            .await
            .map_err(|e| DbError::backend_protocol(format!("mysql connect failed: {}", e)))?;

        let handle = Arc::new(ConnectionHandle::new(
            EngineKind::MySql,
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
            .downcast_mut::<AsyncMysqlConnection>()
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
                    if let Some(conn) = native.downcast_mut::<AsyncMysqlConnection>() {
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
        let Some(conn) = native.downcast_mut::<AsyncMysqlConnection>() else {
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
                // Same tradeoff as the postgres adapter: non-RETURNING-style
                // DML reports 0 affected rows here since `load` reads rows,
                // not a command tag.
                QueryResult::success(rows_json, row_count, column_count, start.elapsed(), row_count as u64)
            }
            Err(e) => QueryResult::failure(format!("mysql execute failed: {}", e)),
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
            .downcast_mut::<AsyncMysqlConnection>()
            .ok_or_else(|| DbError::parameter_invalid("connection kind mismatch"))?;
        if let Some(level) = isolation {
            conn.batch_execute(&format!("SET TRANSACTION ISOLATION LEVEL {}", level))
                .await
                .map_err(|e| DbError::backend_protocol(format!("isolation set failed: {}", e)))?;
        }
        conn.batch_execute("START TRANSACTION")
            .await
            .map_err(|e| DbError::backend_protocol(format!("START TRANSACTION failed: {}", e)))?;
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
            .downcast_mut::<AsyncMysqlConnection>()
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
            .downcast_mut::<AsyncMysqlConnection>()
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
        let mut dealloc = MysqlDeallocator;
        inner.prepared.insert(stmt, &mut dealloc).await
    }

    async fn unprepare(&self, handle: &ConnectionHandle, name: &str) -> Result<(), DbError> {
        let mut inner = handle.lock().await;
        let mut dealloc = MysqlDeallocator;
        inner.prepared.remove(name, &mut dealloc).await.map(|_| ())
    }

    fn build_connection_string(&self, config: &ConnectionConfig) -> Option<String> {
        if let Some(full) = &config.connection_string {
            if !full.is_empty() {
                return Some(full.clone());
            }
        }
        let host = if config.host.is_empty() { "localhost" } else { &config.host };
        let port = if config.port == 0 { 3306 } else { config.port };
        Some(format!(
            "mysql://{}:{}@{}:{}/{}",
            config.username, config.password, host, port, config.database
        ))
    }

    fn validate_connection_string(&self, value: &str) -> bool {
        URL_PREFIX.is_match(value)
    }

    fn escape_identifier(&self, handle: &ConnectionHandle, input: &str) -> Option<String> {
        if handle.kind != EngineKind::MySql {
            return None;
        }
        Some(input.replace('`', "``"))
    }
}

struct MysqlDeallocator;

#[async_trait]
impl hydrogen_db_common::StatementDeallocator for MysqlDeallocator {
    async fn deallocate(&mut self, _stmt: &PreparedStatement) -> Result<(), DbError> {
        Ok(())
    }
}

fn next_tx_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("mysql-tx-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_case_sensitive_prefix() {
        let adapter = MysqlAdapter::new();
        assert!(adapter.validate_connection_string("mysql://host/db"));
        assert!(!adapter.validate_connection_string("MySQL://host/db"));
        assert!(!adapter.validate_connection_string("postgresql://host/db"));
    }

    #[tokio::test]
    async fn escape_identifier_rejects_mismatched_kind() {
        let adapter = MysqlAdapter::new();
        let handle = ConnectionHandle::new(EngineKind::Db2, "DB-DB2-x", 10);
        assert!(adapter.escape_identifier(&handle, "col").is_none());
    }
}
