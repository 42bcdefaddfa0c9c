use anyhow::Result;
use clap::Args;
use colored::Colorize;
use roster_sync::ErrorReason;

use super::{GlobalArgs, connect, load_config};
use crate::output;

#[derive(Args)]
pub struct ExceptionsArgs {
    /// Instance id
    pub instance_id: i64,

    /// Output as JSON
    #[arg(long)]
    pub json: bool
}

pub async fn run(global: &GlobalArgs, args: ExceptionsArgs) -> Result<()> {
    let config = load_config(global)?;
    let service = connect(&config).await?;

    let rows = service.exceptions(args.instance_id).await?;
    if args.json {
        return output::json(&rows);
    }

    if rows.is_empty() {
        output::success("No exceptions");
        return Ok(());
    }

    output::header(&format!("Exceptions for instance {}", args.instance_id));
    println!();
    for row in &rows {
        let reason = match row.reason {
            ErrorReason::NotFound => row.reason.to_string().yellow(),
            ErrorReason::Exit => row.reason.to_string().red()
        };
        println!(
            "  {:<16} {:<24} role {:<3} {}",
            row.identifier, row.organisational_unit, row.role, reason
        );
    }
    Ok(())
}
