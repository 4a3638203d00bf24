//! Ensure-group command implementation

use anyhow::{Context, Result};
use clap::Args;
use tributary::GroupRegistrar;
use tributary_core::GroupStart;

#[derive(Args)]
pub struct EnsureGroupArgs {
    /// Consumer group name
    #[arg(short, long)]
    group: String,

    /// Streams to create the group on (repeatable)
    #[arg(short, long = "stream", required = true)]
    streams: Vec<String>,

    /// Where a new group starts: tail, origin or an entry ID
    #[arg(long, default_value = "tail", value_parser = super::parse_group_start)]
    start: GroupStart,
}

pub async fn execute(url: &str, args: EnsureGroupArgs) -> Result<()> {
    let registrar = GroupRegistrar::new(super::connect(url).await?, args.group, args.start);

    for stream in &args.streams {
        let created = registrar
            .ensure_group(stream)
            .await
            .with_context(|| format!("Failed to ensure group on '{}'", stream))?;
        if created {
            println!("✓ Created group '{}' on '{}'", registrar.group(), stream);
        } else {
            println!("Group '{}' already exists on '{}'", registrar.group(), stream);
        }
    }

    Ok(())
}
