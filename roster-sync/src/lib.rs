pub mod api;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod lock;
pub mod membership;
pub mod memory;
mod proptests;
pub mod resolver;
pub mod scheduler;
pub mod schema;
pub mod state;
pub mod store;
pub mod sync;
pub mod token;
pub mod types;

pub use api::{ApiServer, create_router};
pub use client::{FetchResult, HttpRosterClient, RosterSource};
pub use config::RosterSyncConfig;
pub use engine::{Reconciliation, ReconciliationEngine, RunStats};
pub use error::{RosterSyncError, RosterSyncResult};
pub use lock::{InstanceLock, LocalInstanceLock, PgInstanceLock};
pub use scheduler::SyncScheduler;
pub use state::{ErrorEntry, ErrorReason, ExceptionRow, SyncState};
pub use sync::{RosterSyncService, SkipReason, SweepReport, SyncBackends, SyncOutcome, SyncReport};
pub use token::{AccessToken, HttpTokenClient, TokenProvider};
