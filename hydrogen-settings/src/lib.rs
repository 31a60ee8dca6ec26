//! `AppConfig`: the external configuration collaborator referenced by
//! spec.md §4.8 (Migration Runner) and §6. Grounded on
//! `syncserver-settings::Settings::with_env_and_config_file`, pinned to the
//! same `config` 0.11 generation (0.12+ changed environment-variable
//! merging) and the same `HYDROGEN_` / `__` prefix convention the teacher
//! uses for `SYNC_`.

#[macro_use]
extern crate slog_scope;

use config::{Config, ConfigError, Environment, File};
use hydrogen_db_common::engine::ConnectionConfig;
use hydrogen_db_common::EngineKind;
use serde::Deserialize;

static PREFIX: &str = "hydrogen";

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub name: String,
    /// Raw engine name as configured; normalized with `EngineKind::from_config_name`.
    pub engine: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub connection_string: Option<String>,
    pub timeout_seconds: u32,
    pub ssl: bool,
    pub ssl_ca_path: Option<String>,
    pub ssl_cert_path: Option<String>,
    pub cache_capacity: Option<i64>,
    /// Query run once at bootstrap to populate the QTC (spec §4.7); defaults
    /// to `query_cache_table_default` when unset.
    pub bootstrap_query: Option<String>,
    /// Which worker queue types (`fast`, `medium`, `slow`, `cache`) the Lead
    /// queue spawns children for at startup.
    pub queue_types: Vec<String>,
    pub pool_max_size: usize,
    pub idle_cleanup_interval_seconds: u64,
    /// `None` disables idle-connection eviction entirely, mirroring the
    /// teacher's `Option<max_idle>` sweeper short-circuit.
    pub pool_max_idle_seconds: Option<u64>,
}

impl DatabaseConfig {
    pub fn engine_kind(&self) -> Option<EngineKind> {
        EngineKind::from_config_name(&self.engine)
    }

    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            connection_string: self.connection_string.clone(),
            timeout_seconds: self.timeout_seconds,
            ssl: self.ssl,
            ssl_ca_path: self.ssl_ca_path.clone(),
            ssl_cert_path: self.ssl_cert_path.clone(),
            cache_capacity: self.cache_capacity,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct MigrationConfig {
    pub auto_migration: bool,
    /// Either `PAYLOAD:<prefix>` or a filesystem directory path. `None`
    /// means "not configured" (spec §4.8: success, not failure).
    pub migrations: Option<String>,
    /// Engine name override for `execute_auto`; normalized the same way as
    /// `DatabaseConfig::engine`.
    pub engine_type: Option<String>,
    pub test_migration: bool,
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub databases: Vec<DatabaseConfig>,
    pub migration: MigrationConfig,
    pub heartbeat_interval_seconds: u64,
    pub bootstrap_timeout_seconds: u64,
    pub human_logs: bool,
}

impl AppConfig {
    /// Loads an optional config file then layers `HYDROGEN_FOO__BAR`
    /// environment overrides on top, e.g. `HYDROGEN_HEARTBEAT_INTERVAL_SECONDS=5`.
    pub fn with_env_and_config_file(filename: Option<&str>) -> Result<Self, ConfigError> {
        let mut s = Config::default();

        if let Some(config_filename) = filename {
            s.merge(File::with_name(config_filename))?;
        }

        s.merge(Environment::with_prefix(&PREFIX.to_uppercase()).separator("__"))?;

        match s.try_into::<Self>() {
            Ok(settings) => Ok(settings),
            Err(ConfigError::Message(msg)) => {
                error!("configuration error: {}", msg);
                Err(ConfigError::NotFound(msg))
            }
            Err(e) => {
                error!("configuration error: {:?}", e);
                Err(e)
            }
        }
    }

    pub fn database_config(&self, name: &str) -> Option<&DatabaseConfig> {
        self.databases.iter().find(|d| d.name == name)
    }

    #[cfg(debug_assertions)]
    pub fn test_settings() -> Self {
        Self::with_env_and_config_file(None).expect("could not build test AppConfig")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_config_looks_up_by_name() {
        let app = AppConfig {
            databases: vec![DatabaseConfig {
                name: "users".to_owned(),
                engine: "postgres".to_owned(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(app.database_config("users").is_some());
        assert!(app.database_config("missing").is_none());
    }

    #[test]
    fn engine_kind_normalizes_postgres_alias() {
        let db = DatabaseConfig {
            engine: "postgres".to_owned(),
            ..Default::default()
        };
        assert_eq!(db.engine_kind(), Some(EngineKind::PostgreSql));
    }
}
