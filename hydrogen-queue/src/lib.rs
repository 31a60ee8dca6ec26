//! Database Queue, Queue Manager, Bootstrap/QTC loader, heartbeat, and
//! migration runner: the components that sit above `hydrogen-db-common`'s
//! connection and pool primitives (spec §3, §4.5-§4.8).

#[macro_use]
extern crate slog_scope;

pub mod bootstrap;
pub mod heartbeat;
pub mod manager;
pub mod migration;
pub mod qtc;
pub mod queue;
pub mod worker;

pub use bootstrap::{run_bootstrap, BootstrapOutcome};
pub use heartbeat::{check_connection, run_heartbeat_loop, wait_for_initial_connection};
pub use manager::DatabaseQueueManager;
pub use migration::{execute_auto, validate};
pub use qtc::{PreferredQueueType, QueryCacheEntry, QueryTableCache};
pub use queue::{DatabaseQueue, QueueType, WorkItem};
pub use worker::{run_idle_sweeper, run_worker_loop};
