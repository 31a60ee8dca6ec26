//! Hydrogen: a long-running database federation daemon fronting Postgres,
//! MySQL, SQLite, and DB2 behind a uniform async query queue.
#[macro_use]
extern crate slog_scope;

mod logging;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use docopt::Docopt;
use serde::Deserialize;

use hydrogen_db_common::ConnectionPool;
use hydrogen_engine_db2::Db2Adapter;
use hydrogen_engine_mysql::MysqlAdapter;
use hydrogen_engine_postgres::PostgresAdapter;
use hydrogen_engine_sqlite::SqliteAdapter;
use hydrogen_queue::{
    check_connection, run_bootstrap, run_heartbeat_loop, run_idle_sweeper, run_worker_loop, validate,
    DatabaseQueue, DatabaseQueueManager, QueueType,
};
use hydrogen_registry::EngineRegistry;
use hydrogen_settings::AppConfig;

const USAGE: &str = "
Usage: hydrogen [options]

Options:
    -h, --help          Show this message.
    --config=CONFIGFILE Hydrogen configuration file path.
";

const DEFAULT_BOOTSTRAP_QUERY: &str = "SELECT ref, query, name, queue, timeout, type FROM query_cache";

#[derive(Debug, Deserialize)]
struct Args {
    flag_config: Option<String>,
}

fn build_registry() -> Arc<EngineRegistry> {
    let registry = Arc::new(EngineRegistry::new());
    registry.initialize();
    registry.register(Arc::new(PostgresAdapter::new())).expect("register postgres");
    registry.register(Arc::new(MysqlAdapter::new())).expect("register mysql");
    registry.register(Arc::new(SqliteAdapter::default())).expect("register sqlite");
    registry.register(Arc::new(Db2Adapter::default())).expect("register db2");
    registry
}

async fn spawn_database(
    db: &hydrogen_settings::DatabaseConfig,
    app_config: Arc<AppConfig>,
    registry: Arc<EngineRegistry>,
    manager: Arc<DatabaseQueueManager>,
) {
    let Some(kind) = db.engine_kind() else {
        error!("unrecognized engine"; "database" => &db.name, "engine" => &db.engine);
        return;
    };
    let Some(adapter) = registry.get_by_kind(kind) else {
        error!("no adapter registered"; "engine" => kind.as_str());
        return;
    };
    let connection_string = match registry.build_connection_string(kind, &db.to_connection_config()) {
        Ok(Some(s)) => s,
        _ => {
            error!("could not build connection string"; "database" => &db.name);
            return;
        }
    };

    let designator = format!("DB-{}-{}", kind.as_str().to_uppercase(), db.name);
    let lead = match DatabaseQueue::new_lead(&db.name, &connection_string, kind, &designator) {
        Ok(lead) => lead,
        Err(e) => {
            error!("failed to construct lead queue"; "database" => &db.name, "error" => format!("{}", e));
            return;
        }
    };
    manager.register_lead(Arc::clone(&lead)).await;

    if let Err(e) = validate(&lead, &app_config) {
        warn!("migration validation failed"; "database" => &db.name, "error" => format!("{}", e));
    }

    let pool = Arc::new(ConnectionPool::new(db.pool_max_size));

    for queue_type_name in &db.queue_types {
        let Some(queue_type) = QueueType::from_str(queue_type_name) else {
            warn!("unrecognized queue_type"; "database" => &db.name, "queue_type" => queue_type_name.as_str());
            continue;
        };
        match lead.spawn_child(queue_type).await {
            Ok(child) => {
                let worker_adapter = Arc::clone(&adapter);
                let worker_pool = Arc::clone(&pool);
                tokio::spawn(run_worker_loop(child, worker_adapter, worker_pool));
            }
            Err(e) => {
                warn!("failed to spawn worker queue"; "database" => &db.name, "error" => format!("{}", e));
            }
        }
    }

    let sweeper_interval = Duration::from_secs(db.idle_cleanup_interval_seconds.max(1));
    let sweeper_max_idle = db.pool_max_idle_seconds.map(Duration::from_secs);
    let sweeper_pool = Arc::clone(&pool);
    tokio::spawn(run_idle_sweeper(sweeper_pool, sweeper_interval, sweeper_max_idle));

    let heartbeat_lead = Arc::clone(&lead);
    let heartbeat_adapter = Arc::clone(&adapter);
    let interval = Duration::from_secs(app_config.heartbeat_interval_seconds.max(1));
    tokio::spawn(async move {
        run_heartbeat_loop(heartbeat_lead, heartbeat_adapter, interval).await;
    });

    let bootstrap_lead = Arc::clone(&lead);
    let bootstrap_query = db
        .bootstrap_query
        .clone()
        .unwrap_or_else(|| DEFAULT_BOOTSTRAP_QUERY.to_owned());
    let bootstrap_manager = Arc::clone(&manager);
    let bootstrap_db_name = db.name.clone();
    tokio::spawn(async move {
        check_connection(&bootstrap_lead, adapter.as_ref()).await;
        match run_bootstrap(&bootstrap_lead, adapter.as_ref(), &bootstrap_query).await {
            Ok(()) => readiness_probe(&bootstrap_manager, &bootstrap_db_name, &bootstrap_lead).await,
            Err(e) => error!("bootstrap failed"; "error" => format!("{}", e)),
        }
    });
}

/// Runs the database's first QTC-cached query through the full
/// selector-QTC-worker pipeline once bootstrap completes, the way the
/// teacher's `heartbeat` handler round-trips a trivial query through the
/// whole pool/connection stack to prove the path actually works end to end.
async fn readiness_probe(manager: &DatabaseQueueManager, database_name: &str, lead: &DatabaseQueue) {
    let first_entry = {
        let qtc = lead.lead.as_ref().expect("lead carries LeadState").qtc.lock().await;
        qtc.entries().first().cloned()
    };
    let Some(entry) = first_entry else {
        debug!("readiness probe skipped: QTC is empty"; "database" => database_name);
        return;
    };
    let Some(queue_type) = entry.preferred_queue_type.as_queue_type() else {
        debug!("readiness probe skipped: lead-only query"; "database" => database_name);
        return;
    };
    match manager
        .dispatch(database_name, queue_type, entry.query_ref, serde_json::Value::Null)
        .await
    {
        Ok(result) => info!("readiness probe succeeded"; "database" => database_name, "rows" => result.row_count),
        Err(e) => warn!("readiness probe failed"; "database" => database_name, "error" => format!("{}", e)),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    let app_config = Arc::new(AppConfig::with_env_and_config_file(args.flag_config.as_deref())?);
    logging::init_logging(!app_config.human_logs).expect("logging failed to initialize");
    debug!("starting up");

    let registry = build_registry();
    let manager = Arc::new(DatabaseQueueManager::new());

    for db in &app_config.databases {
        spawn_database(db, Arc::clone(&app_config), Arc::clone(&registry), Arc::clone(&manager)).await;
    }

    info!("hydrogen running"; "databases" => app_config.databases.len());
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    manager.shutdown_all().await;
    logging::reset_logging();

    Ok(())
}
