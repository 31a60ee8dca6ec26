//! `EngineAdapter`: the vtable every engine crate implements (spec §3
//! "EngineAdapter", §4.2).

use std::sync::Arc;

use async_trait::async_trait;

use crate::connection::{ConnectionHandle, Transaction};
use crate::engine::{ConnectionConfig, EngineKind};
use crate::error::DbError;
use crate::query::{QueryRequest, QueryResult};

#[async_trait]
pub trait EngineAdapter: Send + Sync {
    fn kind(&self) -> EngineKind;
    fn name(&self) -> &'static str;

    async fn connect(
        &self,
        config: &ConnectionConfig,
        designator: &str,
    ) -> Result<Arc<ConnectionHandle>, DbError>;

    async fn disconnect(&self, handle: &ConnectionHandle) -> Result<(), DbError>;

    async fn health_check(&self, handle: &ConnectionHandle) -> Result<bool, DbError>;

    async fn reset(&self, handle: &ConnectionHandle) -> Result<(), DbError>;

    async fn execute(&self, handle: &ConnectionHandle, request: &QueryRequest) -> QueryResult;

    async fn execute_prepared(
        &self,
        handle: &ConnectionHandle,
        stmt_name: &str,
        request: &QueryRequest,
    ) -> QueryResult;

    async fn begin_tx(
        &self,
        handle: &ConnectionHandle,
        isolation: Option<&str>,
    ) -> Result<Transaction, DbError>;

    async fn commit_tx(&self, handle: &ConnectionHandle) -> Result<(), DbError>;

    async fn rollback_tx(&self, handle: &ConnectionHandle) -> Result<(), DbError>;

    async fn prepare(&self, handle: &ConnectionHandle, name: &str, sql: &str) -> Result<(), DbError>;

    async fn unprepare(&self, handle: &ConnectionHandle, name: &str) -> Result<(), DbError>;

    /// Builds a connection string from config fields. Returns `None` for a
    /// null config (the caller passes `Option<&ConnectionConfig>` at the
    /// call site in the registry).
    fn build_connection_string(&self, config: &ConnectionConfig) -> Option<String>;

    fn validate_connection_string(&self, value: &str) -> bool;

    /// `None` when `handle.kind()` doesn't match this adapter.
    fn escape_identifier(&self, handle: &ConnectionHandle, input: &str) -> Option<String>;
}
