use redis::streams::{StreamId, StreamReadReply};
use redis::Value;
use tracing::warn;
use tributary_core::{
    error::TributaryError,
    types::{EntryId, Fields, StreamBatch, StreamEntry},
};

/// Map a Redis error to a transport error of the given operation
pub(crate) fn transport(operation: &'static str) -> impl FnOnce(redis::RedisError) -> TributaryError {
    move |err| TributaryError::transport(operation, err)
}

/// Decode a field value, replacing invalid UTF-8
fn field_value(value: &Value) -> String {
    match value {
        Value::BulkString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        other => redis::from_redis_value(other).unwrap_or_else(|_| format!("{:?}", other)),
    }
}

/// Decode one entry. An entry whose ID does not parse is skipped and stays
/// pending in the group.
fn convert_entry(stream: &str, raw: StreamId) -> Option<StreamEntry> {
    let id: EntryId = match raw.id.parse() {
        Ok(id) => id,
        Err(e) => {
            warn!(stream, id = %raw.id, error = %e, "Skipping entry with an unreadable ID");
            return None;
        }
    };

    let fields: Fields = raw
        .map
        .iter()
        .map(|(name, value)| (name.clone(), field_value(value)))
        .collect();

    Some(StreamEntry::new(id, fields))
}

/// Convert an XREADGROUP reply into per-stream batches
pub(crate) fn convert_reply(reply: Option<StreamReadReply>) -> Vec<StreamBatch> {
    let Some(reply) = reply else {
        return Vec::new();
    };

    reply
        .keys
        .into_iter()
        .map(|key| {
            let entries = key
                .ids
                .into_iter()
                .filter_map(|raw| convert_entry(&key.key, raw))
                .collect();
            StreamBatch::new(key.key, entries)
        })
        .collect()
}
