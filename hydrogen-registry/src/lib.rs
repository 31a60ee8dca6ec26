//! Process-wide engine registry: a table indexed by `EngineKind` that owns
//! one `Arc<dyn EngineAdapter>` per backend. Grounded on the teacher's
//! `pool_from_settings` dispatch (`syncserver/src/db/mod.rs`), generalized
//! from a single-engine-at-a-time feature-gated match into a registration
//! table supporting all four engines concurrently, since Hydrogen federates
//! them rather than picking one at build time.

#[macro_use]
extern crate slog_scope;

use std::sync::{Arc, Once, RwLock};

use hydrogen_db_common::{ConnectionConfig, DbError, EngineAdapter, EngineKind};

/// Slot table indexed by `EngineKind::REGISTERABLE` position.
#[derive(Default)]
struct Slots {
    entries: [Option<Arc<dyn EngineAdapter>>; 4],
}

fn slot_index(kind: EngineKind) -> Option<usize> {
    EngineKind::REGISTERABLE.iter().position(|k| *k == kind)
}

pub struct EngineRegistry {
    slots: RwLock<Slots>,
    init: Once,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Slots::default()),
            init: Once::new(),
        }
    }

    /// Idempotent: the second and subsequent calls are a no-op that still
    /// return success, matching spec §4.1's initialization contract.
    pub fn initialize(&self) {
        self.init.call_once(|| {
            info!("engine registry initialized");
        });
    }

    fn is_initialized(&self) -> bool {
        self.init.is_completed()
    }

    /// Fails if the registry hasn't been initialized, the kind is the
    /// reserved `Ai` sentinel (out of range for registration), or that kind
    /// already has an entry.
    pub fn register(&self, adapter: Arc<dyn EngineAdapter>) -> Result<(), DbError> {
        if !self.is_initialized() {
            return Err(DbError::bootstrap_invariant(
                "registry used before initialize()",
            ));
        }
        let kind = adapter.kind();
        let idx = slot_index(kind)
            .ok_or_else(|| DbError::parameter_invalid(format!("{:?} is not registerable", kind)))?;

        let mut slots = self.slots.write().expect("registry lock poisoned");
        if slots.entries[idx].is_some() {
            return Err(DbError::parameter_invalid(format!(
                "adapter already registered for {:?}",
                kind
            )));
        }
        slots.entries[idx] = Some(adapter);
        Ok(())
    }

    pub fn get_by_kind(&self, kind: EngineKind) -> Option<Arc<dyn EngineAdapter>> {
        let idx = slot_index(kind)?;
        self.slots
            .read()
            .expect("registry lock poisoned")
            .entries[idx]
            .clone()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn EngineAdapter>> {
        let slots = self.slots.read().expect("registry lock poisoned");
        slots
            .entries
            .iter()
            .flatten()
            .find(|adapter| adapter.name() == name)
            .cloned()
    }

    pub fn build_connection_string(
        &self,
        kind: EngineKind,
        config: &ConnectionConfig,
    ) -> Result<Option<String>, DbError> {
        let adapter = self
            .get_by_kind(kind)
            .ok_or_else(|| DbError::config_missing(format!("no adapter registered for {:?}", kind)))?;
        Ok(adapter.build_connection_string(config))
    }

    pub fn validate_connection_string(&self, kind: EngineKind, value: &str) -> Result<bool, DbError> {
        let adapter = self
            .get_by_kind(kind)
            .ok_or_else(|| DbError::config_missing(format!("no adapter registered for {:?}", kind)))?;
        Ok(adapter.validate_connection_string(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hydrogen_db_common::{ConnectionHandle, QueryRequest, QueryResult, Transaction};

    struct StubAdapter {
        kind: EngineKind,
        name: &'static str,
    }

    #[async_trait]
    impl EngineAdapter for StubAdapter {
        fn kind(&self) -> EngineKind {
            self.kind
        }
        fn name(&self) -> &'static str {
            self.name
        }
        async fn connect(
            &self,
            _config: &ConnectionConfig,
            _designator: &str,
        ) -> Result<Arc<ConnectionHandle>, DbError> {
            unimplemented!()
        }
        async fn disconnect(&self, _handle: &ConnectionHandle) -> Result<(), DbError> {
            Ok(())
        }
        async fn health_check(&self, _handle: &ConnectionHandle) -> Result<bool, DbError> {
            Ok(true)
        }
        async fn reset(&self, _handle: &ConnectionHandle) -> Result<(), DbError> {
            Ok(())
        }
        async fn execute(&self, _handle: &ConnectionHandle, _request: &QueryRequest) -> QueryResult {
            QueryResult::failure("stub")
        }
        async fn execute_prepared(
            &self,
            _handle: &ConnectionHandle,
            _stmt_name: &str,
            _request: &QueryRequest,
        ) -> QueryResult {
            QueryResult::failure("stub")
        }
        async fn begin_tx(
            &self,
            _handle: &ConnectionHandle,
            _isolation: Option<&str>,
        ) -> Result<Transaction, DbError> {
            Ok(Transaction::new("tx", None))
        }
        async fn commit_tx(&self, _handle: &ConnectionHandle) -> Result<(), DbError> {
            Ok(())
        }
        async fn rollback_tx(&self, _handle: &ConnectionHandle) -> Result<(), DbError> {
            Ok(())
        }
        async fn prepare(&self, _handle: &ConnectionHandle, _name: &str, _sql: &str) -> Result<(), DbError> {
            Ok(())
        }
        async fn unprepare(&self, _handle: &ConnectionHandle, _name: &str) -> Result<(), DbError> {
            Ok(())
        }
        fn build_connection_string(&self, _config: &ConnectionConfig) -> Option<String> {
            Some("stub://".to_owned())
        }
        fn validate_connection_string(&self, value: &str) -> bool {
            !value.is_empty()
        }
        fn escape_identifier(&self, _handle: &ConnectionHandle, input: &str) -> Option<String> {
            Some(input.to_owned())
        }
    }

    #[test]
    fn register_before_initialize_fails() {
        let registry = EngineRegistry::new();
        let err = registry
            .register(Arc::new(StubAdapter {
                kind: EngineKind::Sqlite,
                name: "sqlite",
            }))
            .unwrap_err();
        assert!(format!("{}", err).contains("bootstrap"));
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = EngineRegistry::new();
        registry.initialize();
        registry
            .register(Arc::new(StubAdapter {
                kind: EngineKind::Sqlite,
                name: "sqlite",
            }))
            .unwrap();
        let err = registry
            .register(Arc::new(StubAdapter {
                kind: EngineKind::Sqlite,
                name: "sqlite-2",
            }))
            .unwrap_err();
        assert!(format!("{}", err).contains("already registered"));
    }

    #[test]
    fn ai_kind_is_not_registerable() {
        let registry = EngineRegistry::new();
        registry.initialize();
        let err = registry
            .register(Arc::new(StubAdapter {
                kind: EngineKind::Ai,
                name: "ai",
            }))
            .unwrap_err();
        assert!(format!("{}", err).contains("not registerable"));
    }

    #[test]
    fn get_by_name_finds_registered_adapter() {
        let registry = EngineRegistry::new();
        registry.initialize();
        registry
            .register(Arc::new(StubAdapter {
                kind: EngineKind::MySql,
                name: "mysql",
            }))
            .unwrap();
        assert!(registry.get_by_name("mysql").is_some());
        assert!(registry.get_by_name("nope").is_none());
    }

    #[test]
    fn initialize_is_idempotent() {
        let registry = EngineRegistry::new();
        registry.initialize();
        registry.initialize();
        registry
            .register(Arc::new(StubAdapter {
                kind: EngineKind::Sqlite,
                name: "sqlite",
            }))
            .unwrap();
        assert!(registry.get_by_kind(EngineKind::Sqlite).is_some());
    }
}
