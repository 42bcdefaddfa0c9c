use colored::Colorize;
use roster_sync::SyncOutcome;

pub fn header(title: &str) {
    println!("{}", title.bold().underline());
}

pub fn hint(msg: &str) {
    println!("{} {}", "hint:".cyan().bold(), msg.dimmed());
}

pub fn warn(msg: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), msg);
}

pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

pub fn json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One-line summary of a single instance run.
pub fn outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Reconciled(report) => {
            success(&format!(
                "instance {}: {} synced, {} exceptions",
                report.instance_id, report.synced, report.errors
            ));
            let stats = &report.stats;
            println!(
                "  {} created {}, reactivated {}, departed {}, refused {}, failed {}",
                "transitions:".dimmed(),
                stats.created,
                stats.reactivated,
                stats.departed,
                stats.refused,
                stats.failed
            );
        }
        SyncOutcome::Skipped {
            instance_id,
            reason
        } => warn(&format!("instance {instance_id}: skipped ({reason})"))
    }
}
