//! Consume command implementation

use anyhow::{Context, Result};
use clap::Args;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tributary::prelude::*;

#[derive(Args)]
pub struct ConsumeArgs {
    /// Consumer group name
    #[arg(short, long)]
    group: String,

    /// Consumer name within the group
    #[arg(short, long)]
    consumer: String,

    /// Streams to consume (repeatable)
    #[arg(short, long = "stream", required = true)]
    streams: Vec<String>,

    /// Entries per stream per read
    #[arg(long, default_value_t = 10)]
    max_count: usize,

    /// Read block time in milliseconds (0 blocks until entries arrive)
    #[arg(long, default_value_t = 5000)]
    block_ms: u64,

    /// Retry attempts after a failed delivery
    #[arg(long, default_value_t = 3)]
    max_retry: u32,

    /// Backoff delays in seconds, comma separated
    #[arg(long, value_delimiter = ',', default_values_t = [15u64, 60, 900])]
    backoff_secs: Vec<u64>,

    /// Forward entries whose retries are exhausted to this stream
    #[arg(long)]
    dead_letter: Option<String>,

    /// Where a new group starts: tail, origin or an entry ID
    #[arg(long, default_value = "tail", value_parser = super::parse_group_start)]
    start: GroupStart,
}

impl ConsumeArgs {
    fn consumer_config(&self) -> ConsumerConfig {
        let config = ConsumerConfig::default()
            .with_max_count(self.max_count)
            .with_block(Duration::from_millis(self.block_ms))
            .with_max_retry(self.max_retry)
            .with_backoff(BackoffSchedule::from_secs(&self.backoff_secs))
            .with_group_start(self.start);
        match &self.dead_letter {
            Some(stream) => config.with_dead_letter_stream(stream.clone()),
            None => config,
        }
    }
}

/// Print each entry as one JSON line
fn print_entry() -> impl StreamHandler {
    handler_fn(|stream, entry| async move {
        let line = serde_json::json!({ "stream": stream, "entry": entry });
        println!("{}", line);
        Ok(())
    })
}

pub async fn execute(url: &str, args: ConsumeArgs) -> Result<()> {
    let client = StreamClient::new(
        super::connect(url).await?,
        ClientConfig::new(args.group.clone(), args.consumer.clone()),
    );
    let consumer = client
        .create_consumer(args.consumer_config())
        .await
        .context("Failed to create consumer")?;

    let mut events = consumer.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ConsumerEvent::RetryFailed {
                    stream,
                    entry,
                    retry_count,
                    error,
                    ..
                }) => {
                    tracing::error!(
                        stream = %stream,
                        id = %entry.id,
                        retry_count,
                        error = %error,
                        "Entry given up"
                    );
                }
                Ok(event) => tracing::debug!(kind = event.kind(), "Consumer event"),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event reporter fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let specs = args
        .streams
        .iter()
        .map(|stream| StreamSpec::new(stream.clone(), print_entry()))
        .collect();
    consumer
        .listen(specs)
        .await
        .context("Failed to register streams")?;

    println!(
        "Consuming {} as {}/{}... (Press Ctrl+C to stop)",
        args.streams.join(", "),
        args.group,
        args.consumer
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    let result = consumer.shutdown().await;
    reporter.abort();
    result.context("Consumer stopped with an error")?;

    println!("✓ Consumer stopped");
    Ok(())
}
