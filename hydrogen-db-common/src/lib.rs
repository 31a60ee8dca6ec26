//! Shared types for the hydrogen database subsystem: engine identity,
//! connection/pool/prepared-statement primitives, the `EngineAdapter`
//! vtable, canonical JSON row rendering, and connection-string utilities.
//! Every other hydrogen crate depends on this one.

#[macro_use]
extern crate slog_scope;

pub mod adapter;
pub mod blocking;
pub mod connection;
pub mod connstring;
pub mod engine;
pub mod error;
pub mod json;
pub mod metrics;
pub mod pool;
pub mod prepared;
pub mod query;

pub use adapter::EngineAdapter;
pub use blocking::BlockingThreadpool;
pub use connection::{ConnectionHandle, ConnectionInner, ConnectionState, Transaction};
pub use connstring::{detect_engine, mask_connection_string};
pub use engine::{ConnectionConfig, EngineKind, DEFAULT_CACHE_CAPACITY};
pub use error::{DbError, DbErrorIntrospect, DbResult, Severity};
pub use json::{rows_to_json, CellValue};
pub use metrics::Metrics;
pub use pool::{ConnectionPool, GetPoolState, PoolState};
pub use prepared::{PreparedStatement, PreparedStatementCache, StatementDeallocator};
pub use query::{QueryRequest, QueryResult};
