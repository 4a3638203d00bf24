//! Idempotent consumer group creation.

use std::sync::Arc;
use tracing::{debug, info};
use tributary_core::{
    error::{Result, TributaryError},
    traits::StreamLogClient,
    types::GroupStart,
};

/// Makes sure a stream and its consumer group exist before reads start.
#[derive(Clone)]
pub struct GroupRegistrar {
    log: Arc<dyn StreamLogClient>,
    group: String,
    start: GroupStart,
}

impl GroupRegistrar {
    pub fn new(log: Arc<dyn StreamLogClient>, group: impl Into<String>, start: GroupStart) -> Self {
        Self {
            log,
            group: group.into(),
            start,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Create the group (and the stream, if missing) unless it already exists.
    ///
    /// Returns `true` when this call created the group. Losing a creation race
    /// to another consumer counts as success.
    pub async fn ensure_group(&self, stream: &str) -> Result<bool> {
        let failed = |e: TributaryError| TributaryError::GroupCreation {
            stream: stream.to_string(),
            reason: e.to_string(),
        };

        let stream_exists = self.log.exists(stream).await.map_err(failed)?;
        let group_exists = stream_exists
            && self
                .log
                .group_exists(stream, &self.group)
                .await
                .map_err(failed)?;

        if group_exists {
            debug!(stream, group = %self.group, "Consumer group already exists");
            return Ok(false);
        }

        match self.log.create_group(stream, &self.group, self.start, true).await {
            Ok(()) => {
                info!(
                    stream,
                    group = %self.group,
                    start = %self.start,
                    "Created consumer group"
                );
                Ok(true)
            }
            Err(TributaryError::GroupExists { .. }) => {
                debug!(stream, group = %self.group, "Consumer group created concurrently");
                Ok(false)
            }
            Err(e) => Err(failed(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tributary_core::types::{EntryId, Fields, ReadOptions, StreamBatch, StreamRead};
    use tributary_memory::MemoryStreamLog;

    /// Reports the group as missing, then loses the creation race
    struct RacingLog(MemoryStreamLog);

    #[async_trait]
    impl StreamLogClient for RacingLog {
        async fn exists(&self, _stream: &str) -> Result<bool> {
            Ok(false)
        }
        async fn group_exists(&self, _stream: &str, _group: &str) -> Result<bool> {
            Ok(false)
        }
        async fn create_group(
            &self,
            stream: &str,
            group: &str,
            _start: GroupStart,
            _create_stream: bool,
        ) -> Result<()> {
            Err(TributaryError::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            })
        }
        async fn read_group(
            &self,
            group: &str,
            consumer: &str,
            streams: &[StreamRead],
            options: &ReadOptions,
        ) -> Result<Vec<StreamBatch>> {
            self.0.read_group(group, consumer, streams, options).await
        }
        async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64> {
            self.0.ack(stream, group, ids).await
        }
        async fn append(&self, stream: &str, fields: &Fields) -> Result<EntryId> {
            self.0.append(stream, fields).await
        }
        async fn duplicate(&self) -> Result<Arc<dyn StreamLogClient>> {
            Ok(Arc::new(RacingLog(self.0.clone())))
        }
    }

    #[tokio::test]
    async fn test_creates_stream_and_group_once() {
        let log = MemoryStreamLog::new();
        let registrar = GroupRegistrar::new(Arc::new(log.clone()), "workers", GroupStart::Tail);

        assert!(registrar.ensure_group("orders").await.unwrap());
        assert!(!registrar.ensure_group("orders").await.unwrap());

        assert!(log.exists("orders").await.unwrap());
        assert!(log.group_exists("orders", "workers").await.unwrap());
        assert_eq!(log.stats().group_creations, 1);
    }

    #[tokio::test]
    async fn test_other_group_on_stream_does_not_count() {
        let log = MemoryStreamLog::new();
        log.create_group("orders", "billing", GroupStart::Tail, true)
            .await
            .unwrap();

        let registrar = GroupRegistrar::new(Arc::new(log.clone()), "shipping", GroupStart::Tail);
        assert!(registrar.ensure_group("orders").await.unwrap());
        assert!(log.group_exists("orders", "shipping").await.unwrap());
    }

    #[tokio::test]
    async fn test_lost_race_is_success() {
        let registrar = GroupRegistrar::new(
            Arc::new(RacingLog(MemoryStreamLog::new())),
            "workers",
            GroupStart::Tail,
        );
        assert!(!registrar.ensure_group("orders").await.unwrap());
    }
}
