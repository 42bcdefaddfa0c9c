use anyhow::{Result, bail};
use clap::Args;
use roster_sync::types::{ExternalCourseMapping, GroupTarget, NewInstance};

use super::{GlobalArgs, connect, load_config};
use crate::output;

#[derive(Args)]
pub struct CreateArgs {
    /// Local course id
    #[arg(long)]
    pub course_id: i64,

    /// Selection key as printed by `roster courses`
    #[arg(long)]
    pub course_key: String,

    /// Instance name
    #[arg(long, default_value = "Academic roster")]
    pub name: String,

    /// Put synced accounts in this existing group
    #[arg(long, conflicts_with = "new_group")]
    pub group: Option<i64>,

    /// Create a group named after the external course
    #[arg(long)]
    pub new_group: bool,

    /// Membership validity in days
    #[arg(long)]
    pub period_days: Option<i64>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool
}

pub async fn run(global: &GlobalArgs, args: CreateArgs) -> Result<()> {
    let mapping = ExternalCourseMapping::from_selection_key(&args.course_key)?;
    let enrol_period_seconds = args.period_days.map(period_seconds).transpose()?;
    let config = load_config(global)?;
    let service = connect(&config).await?;

    let mut new_instance = NewInstance::for_course(args.course_id, args.name);
    new_instance.default_role = config.sync.default_role;
    new_instance.enrol_period_seconds = enrol_period_seconds;
    new_instance.group = match (args.group, args.new_group) {
        (_, true) => GroupTarget::CreateNew,
        (Some(group_id), false) => GroupTarget::Existing(group_id),
        (None, false) => GroupTarget::None
    };

    let (instance, outcome) = service.create_instance(new_instance, mapping).await?;
    if args.json {
        return output::json(&serde_json::json!({"instance": instance, "outcome": outcome}));
    }

    output::success(&format!("Created instance {}", instance.id));
    output::outcome(&outcome);
    Ok(())
}

fn period_seconds(days: i64) -> Result<i64> {
    if days <= 0 {
        bail!("--period-days must be positive, got {days}");
    }
    match days.checked_mul(86_400) {
        Some(seconds) => Ok(seconds),
        None => bail!("--period-days {days} is too large")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_seconds() {
        assert_eq!(period_seconds(1).unwrap(), 86_400);
        assert_eq!(period_seconds(30).unwrap(), 2_592_000);
        assert!(period_seconds(0).is_err());
        assert!(period_seconds(-2).is_err());
        assert!(period_seconds(i64::MAX / 1000).is_err());
    }
}
