pub mod courses;
pub mod create;
pub mod exceptions;
pub mod serve;
pub mod sweep;
pub mod sync;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use roster_sync::schema::initialize_schema;
use roster_sync::{RosterSyncConfig, RosterSyncService};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "roster",
    author,
    version,
    about = "Roster sync - keeps course enrolments in line with the academic roster",
    long_about = "Reconciles course enrolments against an external academic roster.\n\nSettings \
                  come from an optional TOML file, overridden by ROSTER_* environment variables."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands
}

#[derive(Args)]
pub struct GlobalArgs {
    /// Path to the TOML configuration file
    #[arg(long, short, global = true, env = "ROSTER_CONFIG")]
    pub config: Option<PathBuf>
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Re-run the reconciliation of one instance")]
    Sync(sync::SyncArgs),

    #[command(about = "Reconcile every enabled instance once")]
    Sweep(sweep::SweepArgs),

    #[command(about = "List the external courses an account can bind")]
    Courses(courses::CoursesArgs),

    #[command(about = "Create an instance bound to an external course")]
    Create(create::CreateArgs),

    #[command(about = "Show the exceptions list of an instance")]
    Exceptions(exceptions::ExceptionsArgs),

    #[command(about = "Run the scheduler and the operator API")]
    Serve(serve::ServeArgs)
}

pub fn load_config(global: &GlobalArgs) -> Result<RosterSyncConfig> {
    RosterSyncConfig::load(global.config.as_deref()).context("Failed to load configuration")
}

pub async fn connect(config: &RosterSyncConfig) -> Result<Arc<RosterSyncService>> {
    if config.database_url.is_empty() {
        bail!("database_url is not configured (set ROSTER_DATABASE_URL)");
    }

    // Each run holds one connection for its advisory lock and uses another for
    // store I/O; the extra two serve operator requests.
    let pool = PgPoolOptions::new()
        .max_connections(u32::try_from(config.sync.max_concurrent_runs * 2 + 2).unwrap_or(16))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    initialize_schema(&pool).await?;

    Ok(Arc::new(RosterSyncService::from_pool(config.clone(), pool)?))
}
