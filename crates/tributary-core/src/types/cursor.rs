use super::entry::{EntryId, StreamEntry};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Position from which the next group read of a stream starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamCursor {
    /// Replay entries already delivered to this consumer with an ID greater
    /// than the given one (the consumer's pending history)
    After(EntryId),

    /// Only entries never delivered to any consumer of the group
    Live,
}

impl StreamCursor {
    pub fn is_live(&self) -> bool {
        matches!(self, StreamCursor::Live)
    }
}

impl fmt::Display for StreamCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamCursor::After(id) => write!(f, "{}", id),
            StreamCursor::Live => f.write_str(">"),
        }
    }
}

/// Where a newly created consumer group starts delivering from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GroupStart {
    /// Only entries appended after the group was created (`$`)
    #[default]
    Tail,

    /// Every entry of the stream (`0`)
    Origin,

    /// Entries with an ID greater than the given one
    At(EntryId),
}

impl fmt::Display for GroupStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupStart::Tail => f.write_str("$"),
            GroupStart::Origin => f.write_str("0"),
            GroupStart::At(id) => write!(f, "{}", id),
        }
    }
}

/// One stream of a multi-stream group read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRead {
    pub stream: String,
    pub cursor: StreamCursor,
}

impl StreamRead {
    pub fn new(stream: impl Into<String>, cursor: StreamCursor) -> Self {
        Self {
            stream: stream.into(),
            cursor,
        }
    }
}

/// Options of a blocking group read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// How long to wait for new entries; zero waits indefinitely
    pub block: Duration,

    /// Maximum entries returned per stream
    pub count: usize,
}

/// Entries returned for one stream by a group read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBatch {
    pub stream: String,
    pub entries: Vec<StreamEntry>,
}

impl StreamBatch {
    pub fn new(stream: impl Into<String>, entries: Vec<StreamEntry>) -> Self {
        Self {
            stream: stream.into(),
            entries,
        }
    }

    pub fn last_id(&self) -> Option<EntryId> {
        self.entries.last().map(|e| e.id)
    }
}
