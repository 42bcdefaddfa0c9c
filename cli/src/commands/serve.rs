use anyhow::Result;
use clap::Args;
use roster_sync::{ApiServer, SyncScheduler};
use tracing::info;

use super::{GlobalArgs, connect, load_config};

#[derive(Args)]
pub struct ServeArgs {
    /// Listen port, overrides the configured one
    #[arg(long)]
    pub port: Option<u16>,

    /// Do not start the periodic sweep
    #[arg(long)]
    pub no_scheduler: bool
}

pub async fn run(global: &GlobalArgs, args: ServeArgs) -> Result<()> {
    let mut config = load_config(global)?;
    if let Some(port) = args.port {
        config.api.port = port;
    }
    let service = connect(&config).await?;

    let _scheduler = if args.no_scheduler {
        None
    } else {
        let scheduler = SyncScheduler::new(service.clone()).await?;
        scheduler.start().await?;
        Some(scheduler)
    };

    info!(port = config.api.port, "Serving roster sync");
    ApiServer::new(config.api.clone(), service).run().await?;
    Ok(())
}
