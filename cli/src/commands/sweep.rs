use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::{GlobalArgs, connect, load_config};
use crate::output;

#[derive(Args)]
pub struct SweepArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool
}

pub async fn run(global: &GlobalArgs, args: SweepArgs) -> Result<()> {
    let config = load_config(global)?;
    let service = connect(&config).await?;

    let report = service.sync_all().await?;
    if args.json {
        return output::json(&report);
    }

    output::header("Roster Sweep");
    println!();
    println!(
        "  {} reconciled, {} skipped, {} failed",
        report.reconciled.len().to_string().green(),
        report.skipped.len().to_string().yellow(),
        report.errors.len().to_string().red()
    );
    for (instance_id, reason) in &report.skipped {
        println!("  {} instance {}: {}", "-".dimmed(), instance_id, reason);
    }
    for error in &report.errors {
        output::warn(&format!("instance {}: {}", error.instance_id, error.error));
    }
    Ok(())
}
