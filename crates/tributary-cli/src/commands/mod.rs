pub mod consume;
pub mod group;
pub mod produce;

use anyhow::{Context, Result};
use std::sync::Arc;
use tributary_core::{types::GroupStart, StreamLogClient};
use tributary_redis::RedisStreamLog;

pub(crate) async fn connect(url: &str) -> Result<Arc<dyn StreamLogClient>> {
    let log = RedisStreamLog::connect(url)
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    Ok(Arc::new(log))
}

/// Parse `tail`, `origin` or an entry ID
pub(crate) fn parse_group_start(value: &str) -> Result<GroupStart, String> {
    match value {
        "tail" | "$" => Ok(GroupStart::Tail),
        "origin" | "0" => Ok(GroupStart::Origin),
        id => id
            .parse()
            .map(GroupStart::At)
            .map_err(|e| format!("expected tail, origin or an entry ID: {}", e)),
    }
}
