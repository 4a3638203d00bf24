//! Stream log transport trait
//!
//! Defines the interface the consumer engine needs from an append-only
//! stream log with native consumer groups (in-memory, Redis Streams, etc.)

use crate::error::Result;
use crate::types::{EntryId, Fields, GroupStart, ReadOptions, StreamBatch, StreamRead};
use async_trait::async_trait;
use std::sync::Arc;

/// Client of a stream log that supports consumer groups
///
/// Implementations map every failure of the underlying connection to
/// `TributaryError::Transport`.
#[async_trait]
pub trait StreamLogClient: Send + Sync {
    /// Whether a stream with this name exists
    async fn exists(&self, stream: &str) -> Result<bool>;

    /// Whether the named consumer group exists on the stream
    ///
    /// Returns `false` when the stream itself does not exist.
    async fn group_exists(&self, stream: &str, group: &str) -> Result<bool>;

    /// Create a consumer group
    ///
    /// With `create_stream` set, a missing stream is created empty.
    /// Creating a group that already exists is an error.
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
        create_stream: bool,
    ) -> Result<()>;

    /// Read entries for a group member from one or more streams
    ///
    /// Streams read with `StreamCursor::After` return immediately with the
    /// member's pending history (possibly empty). When every stream is read
    /// with `StreamCursor::Live`, the call blocks up to `options.block` for
    /// new entries and returns an empty list if none arrive.
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &[StreamRead],
        options: &ReadOptions,
    ) -> Result<Vec<StreamBatch>>;

    /// Acknowledge entries, removing them from the group's pending list
    ///
    /// Returns how many entries were actually acknowledged.
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64>;

    /// Append an entry with a log-assigned ID
    async fn append(&self, stream: &str, fields: &Fields) -> Result<EntryId>;

    /// Open an independent connection to the same log
    ///
    /// The consumer engine issues its blocking reads on a duplicate so that a
    /// long read never delays acknowledgments.
    async fn duplicate(&self) -> Result<Arc<dyn StreamLogClient>>;
}
