use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::{GlobalArgs, connect, load_config};
use crate::output;

#[derive(Args)]
pub struct CoursesArgs {
    /// Account identity (staff number) as known upstream
    pub account: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool
}

pub async fn run(global: &GlobalArgs, args: CoursesArgs) -> Result<()> {
    let config = load_config(global)?;
    let service = connect(&config).await?;

    let courses = service.available_courses(&args.account).await;
    if args.json {
        return output::json(&courses);
    }

    if courses.is_empty() {
        output::warn("No courses reported (or the roster source is unreachable)");
        return Ok(());
    }

    output::header(&format!("Courses for {}", args.account));
    for course in &courses {
        println!("  {}  {}", course.label.cyan(), course.key.dimmed());
    }
    output::hint("Pass a key to `roster create --course-key` to bind it");
    Ok(())
}
