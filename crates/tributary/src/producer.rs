use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use tributary_core::{
    error::Result,
    traits::StreamLogClient,
    types::{EntryId, Fields},
};

/// Field written by [`Producer::append_json`].
pub const PAYLOAD_FIELD: &str = "payload";

/// Appends entries to streams.
#[derive(Clone)]
pub struct Producer {
    log: Arc<dyn StreamLogClient>,
}

impl Producer {
    pub fn new(log: Arc<dyn StreamLogClient>) -> Self {
        Self { log }
    }

    /// Append an entry; the log assigns its ID.
    pub async fn append(&self, stream: &str, fields: &Fields) -> Result<EntryId> {
        let id = self.log.append(stream, fields).await?;
        debug!(stream, id = %id, fields = fields.len(), "Appended entry");
        Ok(id)
    }

    /// Append a value serialized as JSON under the `payload` field.
    pub async fn append_json<T: Serialize + ?Sized>(&self, stream: &str, value: &T) -> Result<EntryId> {
        let mut fields = Fields::new();
        fields.insert(PAYLOAD_FIELD.to_string(), serde_json::to_string(value)?);
        self.append(stream, &fields).await
    }
}
