//! Produce command implementation

use anyhow::{bail, Context, Result};
use clap::Args;
use tributary::Producer;
use tributary_core::Fields;

#[derive(Args)]
pub struct ProduceArgs {
    /// Stream to append to
    #[arg(short, long)]
    stream: String,

    /// Entry field as key=value (repeatable)
    #[arg(short, long = "field", value_parser = parse_field)]
    fields: Vec<(String, String)>,

    /// JSON document stored under the `payload` field
    #[arg(short, long, conflicts_with = "fields")]
    json: Option<String>,
}

fn parse_field(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => Err(format!("expected key=value, got '{}'", value)),
    }
}

pub async fn execute(url: &str, args: ProduceArgs) -> Result<()> {
    let producer = Producer::new(super::connect(url).await?);

    let id = match args.json {
        Some(json) => {
            let value: serde_json::Value =
                serde_json::from_str(&json).context("Invalid JSON payload")?;
            producer
                .append_json(&args.stream, &value)
                .await
                .context("Failed to append entry")?
        }
        None => {
            if args.fields.is_empty() {
                bail!("Nothing to append: pass --field key=value or --json");
            }
            let fields: Fields = args.fields.into_iter().collect();
            producer
                .append(&args.stream, &fields)
                .await
                .context("Failed to append entry")?
        }
    };

    tracing::info!(stream = %args.stream, id = %id, "Appended entry");
    println!("{}", id);
    Ok(())
}
