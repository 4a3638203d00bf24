//! Observability events emitted by a consumer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tributary_core::types::StreamEntry;

/// Events emitted by the consumer engine and its retry scheduler.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsumerEvent {
    /// A handler call failed.
    ProcessError {
        /// Error chain rendered as text.
        error: String,
        /// Stream of the entry.
        stream: String,
        /// The entry being processed.
        entry: StreamEntry,
        /// Retry attempt that failed (0 for the first delivery).
        retry_count: u32,
    },
    /// A retry attempt is starting (its backoff wait begins now).
    Retry {
        stream: String,
        entry: StreamEntry,
        retry_count: u32,
        timestamp: DateTime<Utc>,
    },
    /// Retries are exhausted; the entry is given up.
    RetryFailed {
        /// Last handler error.
        error: String,
        stream: String,
        entry: StreamEntry,
        retry_count: u32,
        /// Start time of every retry attempt, oldest first.
        attempt_timestamps: Vec<DateTime<Utc>>,
    },
    /// A read or acknowledgment call to the stream log failed.
    TransportError { operation: String, error: String },
}

impl ConsumerEvent {
    /// Stream the event refers to, if any.
    pub fn stream(&self) -> Option<&str> {
        match self {
            Self::ProcessError { stream, .. }
            | Self::Retry { stream, .. }
            | Self::RetryFailed { stream, .. } => Some(stream),
            Self::TransportError { .. } => None,
        }
    }

    /// Short name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProcessError { .. } => "process_error",
            Self::Retry { .. } => "retry",
            Self::RetryFailed { .. } => "retry_failed",
            Self::TransportError { .. } => "transport_error",
        }
    }
}

/// Fan-out of consumer events to any number of subscribers.
///
/// Emitting never blocks; subscribers that fall more than the configured
/// capacity behind miss the oldest events.
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<ConsumerEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsumerEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ConsumerEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}
