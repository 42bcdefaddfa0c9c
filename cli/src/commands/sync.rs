use anyhow::Result;
use clap::Args;

use super::{GlobalArgs, connect, load_config};
use crate::output;

#[derive(Args)]
pub struct SyncArgs {
    /// Instance id
    pub instance_id: i64,

    /// Output as JSON
    #[arg(long)]
    pub json: bool
}

pub async fn run(global: &GlobalArgs, args: SyncArgs) -> Result<()> {
    let config = load_config(global)?;
    let service = connect(&config).await?;

    let outcome = service.sync_instance(args.instance_id).await?;
    if args.json {
        return output::json(&outcome);
    }

    output::outcome(&outcome);
    if outcome.report().is_some_and(|r| r.errors > 0) {
        output::hint(&format!(
            "Run `roster exceptions {}` to see who could not be synced",
            args.instance_id
        ));
    }
    Ok(())
}
