//! Forwarding of exhausted entries to a dead-letter stream.

use crate::producer::Producer;
use tracing::info;
use tributary_core::{
    error::Result,
    types::{EntryId, StreamEntry},
};

pub const SOURCE_STREAM_FIELD: &str = "dead_letter.source_stream";
pub const SOURCE_ID_FIELD: &str = "dead_letter.source_id";
pub const RETRY_COUNT_FIELD: &str = "dead_letter.retry_count";
pub const ERROR_FIELD: &str = "dead_letter.error";

/// Copies an entry into the dead-letter stream along with where it came from
/// and why it was given up.
#[derive(Clone)]
pub struct DeadLetterRouter {
    producer: Producer,
    stream: String,
}

impl DeadLetterRouter {
    pub fn new(producer: Producer, stream: impl Into<String>) -> Self {
        Self {
            producer,
            stream: stream.into(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub async fn forward(
        &self,
        source_stream: &str,
        entry: &StreamEntry,
        retry_count: u32,
        error: &str,
    ) -> Result<EntryId> {
        let mut fields = entry.fields.clone();
        fields.insert(SOURCE_STREAM_FIELD.to_string(), source_stream.to_string());
        fields.insert(SOURCE_ID_FIELD.to_string(), entry.id.to_string());
        fields.insert(RETRY_COUNT_FIELD.to_string(), retry_count.to_string());
        fields.insert(ERROR_FIELD.to_string(), error.to_string());

        let id = self.producer.append(&self.stream, &fields).await?;
        info!(
            source_stream,
            source_id = %entry.id,
            dead_letter_stream = %self.stream,
            dead_letter_id = %id,
            "Forwarded entry to dead-letter stream"
        );
        Ok(id)
    }
}
