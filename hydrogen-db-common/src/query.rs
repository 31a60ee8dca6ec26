//! Request/response shapes that flow through the queue, cache, and adapter
//! layers (spec §3, "QueryRequest / QueryResult").

use std::time::Duration;

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query_id: String,
    /// Either a raw SQL template or the name of a previously prepared
    /// statement on the target connection.
    pub sql_or_prepared_name: String,
    pub parameters: Value,
    pub timeout: Duration,
    pub isolation: Option<String>,
}

impl QueryRequest {
    pub fn new(query_id: impl Into<String>, sql_or_prepared_name: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            sql_or_prepared_name: sql_or_prepared_name.into(),
            parameters: Value::Null,
            timeout: Duration::from_secs(30),
            isolation: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub success: bool,
    /// Canonical array-of-objects JSON, per `hydrogen_db_common::json`.
    pub rows_json: String,
    pub row_count: usize,
    pub column_count: usize,
    pub error_message: Option<String>,
    pub execution_time: Duration,
    pub affected_rows: u64,
}

impl QueryResult {
    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            rows_json: "[]".to_owned(),
            row_count: 0,
            column_count: 0,
            error_message: Some(error_message.into()),
            execution_time: Duration::default(),
            affected_rows: 0,
        }
    }

    pub fn success(
        rows_json: String,
        row_count: usize,
        column_count: usize,
        execution_time: Duration,
        affected_rows: u64,
    ) -> Self {
        Self {
            success: true,
            rows_json,
            row_count,
            column_count,
            error_message: None,
            execution_time,
            affected_rows,
        }
    }
}
