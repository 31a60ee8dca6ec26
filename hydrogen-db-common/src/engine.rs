//! `EngineKind` and `ConnectionConfig`: the closed set of backends and the
//! per-connection configuration each adapter builds its native connection
//! string from.

use serde::{Deserialize, Serialize};

/// Closed enumeration of backends the registry can dispatch to. `Ai` is a
/// future-reserved sentinel for a non-SQL engine sharing this interface; it
/// has no adapter and must never be registered (see `hydrogen-registry`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    PostgreSql,
    MySql,
    Sqlite,
    Db2,
    Ai,
}

impl EngineKind {
    /// All kinds a caller may legally register an adapter for. `Ai` is
    /// deliberately excluded: it is reserved, not dispatchable.
    pub const REGISTERABLE: [EngineKind; 4] = [
        EngineKind::PostgreSql,
        EngineKind::MySql,
        EngineKind::Sqlite,
        EngineKind::Db2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::PostgreSql => "postgresql",
            EngineKind::MySql => "mysql",
            EngineKind::Sqlite => "sqlite",
            EngineKind::Db2 => "db2",
            EngineKind::Ai => "ai",
        }
    }

    /// Normalizes a configured engine name the way the migration runner
    /// does for its `type` setting: `postgres` is accepted as an alias of
    /// `postgresql`.
    pub fn from_config_name(name: &str) -> Option<EngineKind> {
        match name {
            "postgres" | "postgresql" => Some(EngineKind::PostgreSql),
            "mysql" => Some(EngineKind::MySql),
            "sqlite" => Some(EngineKind::Sqlite),
            "db2" => Some(EngineKind::Db2),
            _ => None,
        }
    }
}

/// Default prepared-statement cache capacity used whenever a
/// `ConnectionConfig`'s `cache_capacity` is zero or negative.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Takes precedence over the other fields when present.
    pub connection_string: Option<String>,
    pub timeout_seconds: u32,
    pub ssl: bool,
    pub ssl_ca_path: Option<String>,
    pub ssl_cert_path: Option<String>,
    /// 0 or negative (represented here as `None`/`Some(0)`) means "use
    /// `DEFAULT_CACHE_CAPACITY`".
    pub cache_capacity: Option<i64>,
}

impl ConnectionConfig {
    /// Resolves `cache_capacity`, applying the default-on-non-positive rule.
    pub fn resolved_cache_capacity(&self) -> usize {
        match self.cache_capacity {
            Some(n) if n > 0 => n as usize,
            _ => DEFAULT_CACHE_CAPACITY,
        }
    }
}
