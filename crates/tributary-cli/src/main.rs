//! Tributary CLI - produce to and consume from Redis stream groups

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "tributary")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Redis server URL
    #[arg(short, long, default_value = "redis://127.0.0.1:6379/", env = "TRIBUTARY_URL")]
    url: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append an entry to a stream
    Produce(commands::produce::ProduceArgs),

    /// Consume streams as a member of a consumer group until Ctrl+C
    Consume(commands::consume::ConsumeArgs),

    /// Create a consumer group on a stream if it does not exist
    EnsureGroup(commands::group::EnsureGroupArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    match cli.command {
        Commands::Produce(args) => commands::produce::execute(&cli.url, args).await?,
        Commands::Consume(args) => commands::consume::execute(&cli.url, args).await?,
        Commands::EnsureGroup(args) => commands::group::execute(&cli.url, args).await?,
    }

    Ok(())
}
