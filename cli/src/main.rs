use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync(args) => commands::sync::run(&cli.global, args).await,
        Commands::Sweep(args) => commands::sweep::run(&cli.global, args).await,
        Commands::Courses(args) => commands::courses::run(&cli.global, args).await,
        Commands::Create(args) => commands::create::run(&cli.global, args).await,
        Commands::Exceptions(args) => commands::exceptions::run(&cli.global, args).await,
        Commands::Serve(args) => commands::serve::run(&cli.global, args).await
    }
}
