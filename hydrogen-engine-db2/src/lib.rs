//! DB2 `EngineAdapter`.
//!
//! No DB2 driver crate appears anywhere in the corpus this workspace was
//! grown from; `odbc-api` is used as the realistic stand-in (DB2's own
//! client libraries are only exposed through ODBC/CLI in the Rust
//! ecosystem). See DESIGN.md for the justification. The synchronous
//! `odbc-api` calls run through `BlockingThreadpool`, the same seam the
//! teacher uses for its synchronous diesel connections.

#[macro_use]
extern crate slog_scope;

use std::sync::Arc;

use async_trait::async_trait;
use hydrogen_db_common::{
    BlockingThreadpool, CellValue, ConnectionConfig, ConnectionHandle, DbError, EngineAdapter,
    EngineKind, PreparedStatement, QueryRequest, QueryResult, Transaction,
};
use odbc_api::buffers::TextRowSet;
use odbc_api::{ConnectionOptions, Cursor, Environment};
use once_cell::sync::Lazy;

/// Rows are fetched in batches of this size through `TextRowSet` (odbc-api's
/// schema-agnostic reader), not all at once, to bound peak memory for a
/// large result set.
const FETCH_BATCH_SIZE: usize = 256;
/// Longest column value `TextRowSet` will buffer before truncating.
const MAX_TEXT_LEN: usize = 4096;

/// Drains every batch from a bound cursor into `CellValue` rows, using
/// whatever column names and count the driver reports at execute time.
fn read_dynamic_rows(
    mut cursor: impl Cursor,
) -> Result<Vec<Vec<CellValue>>, odbc_api::Error> {
    let column_names: Vec<String> = cursor.column_names()?.collect::<Result<_, _>>()?;
    let mut buffers = TextRowSet::for_cursor(FETCH_BATCH_SIZE, &mut cursor, Some(MAX_TEXT_LEN))?;
    let mut row_set_cursor = cursor.bind_buffer(&mut buffers)?;

    let mut rows = Vec::new();
    while let Some(batch) = row_set_cursor.fetch()? {
        for row_index in 0..batch.num_rows() {
            let mut row = Vec::with_capacity(column_names.len());
            for (col_index, name) in column_names.iter().enumerate() {
                let value = batch
                    .at(col_index, row_index)
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
                row.push(CellValue {
                    column_name: name.clone(),
                    value,
                    is_numeric: false,
                });
            }
            rows.push(row);
        }
    }
    Ok(rows)
}

/// One process-wide ODBC environment; `odbc-api` connections borrow it, so
/// it must outlive every connection this adapter creates.
static ENVIRONMENT: Lazy<Environment> =
    Lazy::new(|| Environment::new().expect("failed to initialize ODBC environment"));

pub struct Db2Adapter {
    blocking: Arc<BlockingThreadpool>,
}

impl Default for Db2Adapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Db2Adapter {
    pub fn new() -> Self {
        Self {
            blocking: Arc::new(BlockingThreadpool::new()),
        }
    }
}

type OdbcConn = odbc_api::Connection<'static>;

#[async_trait]
impl EngineAdapter for Db2Adapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Db2
    }

    fn name(&self) -> &'static str {
        "db2"
    }

    async fn connect(
        &self,
        config: &ConnectionConfig,
        designator: &str,
    ) -> Result<Arc<ConnectionHandle>, DbError> {
        let conn_str = self
            .build_connection_string(config)
            .ok_or_else(|| DbError::parameter_invalid("db2 connect requires a connection string"))?;
        let blocking = self.blocking.clone();
        let conn: OdbcConn = blocking
            .spawn(move || {
                ENVIRONMENT
                    .connect_with_connection_string(&conn_str, ConnectionOptions::default())
                    .map_err(|e| DbError::backend_protocol(format!("db2 connect failed: {}", e)))
            })
            .await?;

        let handle = Arc::new(ConnectionHandle::new(
            EngineKind::Db2,
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
            .downcast_mut::<OdbcConn>()
            .ok_or_else(|| DbError::parameter_invalid("connection kind mismatch"))?;
        let ok = conn.execute("SELECT 1 FROM SYSIBM.SYSDUMMY1", ()).is_ok();
        drop(inner);
        handle.touch_health_check().await;
        Ok(ok)
    }

    async fn reset(&self, handle: &ConnectionHandle) -> Result<(), DbError> {
        let mut inner = handle.lock().await;
        if let Some(tx) = inner.transaction.take() {
            if tx.active {
                if let Some(native) = inner.native.as_mut() {
                    if let Some(conn) = native.downcast_mut::<OdbcConn>() {
                        let _ = conn.rollback();
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
        let Some(conn) = native.downcast_mut::<OdbcConn>() else {
            return QueryResult::failure("connection kind mismatch");
        };

        let result = match conn.execute(&request.sql_or_prepared_name, ()) {
            // DDL/DML with no result set, e.g. an UPDATE with no RETURNING
            // clause; odbc-api gives no generic affected-row count here.
            Ok(None) => {
                let rows_json = match hydrogen_db_common::rows_to_json(&[]) {
                    Ok(json) => json,
                    Err(e) => return QueryResult::failure(format!("{}", e)),
                };
                QueryResult::success(rows_json, 0, 0, start.elapsed(), 0)
            }
            Ok(Some(cursor)) => match read_dynamic_rows(cursor) {
                Ok(raw_rows) => {
                    let column_count = raw_rows.first().map_or(0, |r| r.len());
                    let row_count = raw_rows.len();
                    let rows_json = match hydrogen_db_common::rows_to_json(&raw_rows) {
                        Ok(json) => json,
                        Err(e) => return QueryResult::failure(format!("{}", e)),
                    };
                    QueryResult::success(rows_json, row_count, column_count, start.elapsed(), row_count as u64)
                }
                Err(e) => QueryResult::failure(format!("db2 row fetch failed: {}", e)),
            },
            Err(e) => QueryResult::failure(format!("db2 execute failed: {}", e)),
        };
        result
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
            .downcast_mut::<OdbcConn>()
            .ok_or_else(|| DbError::parameter_invalid("connection kind mismatch"))?;
        conn.set_autocommit(false)
            .map_err(|e| DbError::backend_protocol(format!("autocommit off failed: {}", e)))?;
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
            .downcast_mut::<OdbcConn>()
            .ok_or_else(|| DbError::parameter_invalid("connection kind mismatch"))?;
        conn.commit()
            .map_err(|e| DbError::backend_protocol(format!("commit failed: {}", e)))?;
        conn.set_autocommit(true)
            .map_err(|e| DbError::backend_protocol(format!("autocommit on failed: {}", e)))?;
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
            .downcast_mut::<OdbcConn>()
            .ok_or_else(|| DbError::parameter_invalid("connection kind mismatch"))?;
        conn.rollback()
            .map_err(|e| DbError::backend_protocol(format!("rollback failed: {}", e)))?;
        conn.set_autocommit(true)
            .map_err(|e| DbError::backend_protocol(format!("autocommit on failed: {}", e)))?;
        inner.transaction = None;
        Ok(())
    }

    async fn prepare(&self, handle: &ConnectionHandle, name: &str, sql: &str) -> Result<(), DbError> {
        if name.is_empty() || sql.is_empty() {
            return Err(DbError::parameter_invalid("prepare requires name and sql"));
        }
        let mut inner = handle.lock().await;
        let stmt = PreparedStatement::new(name, sql);
        let mut dealloc = Db2Deallocator;
        inner.prepared.insert(stmt, &mut dealloc).await
    }

    async fn unprepare(&self, handle: &ConnectionHandle, name: &str) -> Result<(), DbError> {
        let mut inner = handle.lock().await;
        let mut dealloc = Db2Deallocator;
        inner.prepared.remove(name, &mut dealloc).await.map(|_| ())
    }

    /// SQLite and DB2 both just return `database` unchanged (spec §4.2); a
    /// full `connection_string` still wins verbatim.
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

    /// Any non-empty string is accepted, including all-whitespace (spec
    /// §4.2).
    fn validate_connection_string(&self, value: &str) -> bool {
        !value.is_empty()
    }

    fn escape_identifier(&self, handle: &ConnectionHandle, input: &str) -> Option<String> {
        if handle.kind != EngineKind::Db2 {
            return None;
        }
        Some(input.replace('"', "\"\""))
    }
}

struct Db2Deallocator;

#[async_trait]
impl hydrogen_db_common::StatementDeallocator for Db2Deallocator {
    async fn deallocate(&mut self, _stmt: &PreparedStatement) -> Result<(), DbError> {
        Ok(())
    }
}

fn next_tx_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("db2-tx-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_any_non_empty_string() {
        let adapter = Db2Adapter::new();
        assert!(adapter.validate_connection_string("   "));
        assert!(adapter.validate_connection_string("DATABASE=sample;"));
        assert!(!adapter.validate_connection_string(""));
    }

    #[test]
    fn build_connection_string_returns_database_field_unchanged() {
        let adapter = Db2Adapter::new();
        let config = ConnectionConfig {
            database: "SAMPLE".to_owned(),
            ..Default::default()
        };
        assert_eq!(
            adapter.build_connection_string(&config),
            Some("SAMPLE".to_owned())
        );
    }

    #[test]
    fn build_connection_string_rejects_empty_database() {
        let adapter = Db2Adapter::new();
        assert_eq!(adapter.build_connection_string(&ConnectionConfig::default()), None);
    }
}
