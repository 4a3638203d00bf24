//! Retry scheduling for entries whose handler failed.
//!
//! Every failed entry gets its own timeline task: wait the backoff delay for
//! the attempt, call the handler again, and stop on success or after
//! `max_retry` attempts. Timelines are keyed by `(stream, entry id)`, so an
//! entry redelivered while its timeline is running is not scheduled twice.

use crate::ack::AckBatcher;
use crate::dead_letter::DeadLetterRouter;
use crate::events::{ConsumerEvent, EventSink};
use crate::handler::StreamHandler;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use tributary_core::{
    config::{BackoffSchedule, ConsumerConfig, RetryShutdownPolicy},
    observe,
    types::{EntryId, StreamEntry},
};

type RetryKey = (String, EntryId);

/// Retry bookkeeping of one entry.
pub struct RetryState {
    pub message_id: EntryId,
    pub stream: String,
    pub retry_count: u32,
    pub attempt_timestamps: Vec<DateTime<Utc>>,
    pub last_error: String,
    entry: StreamEntry,
    handler: Arc<dyn StreamHandler>,
}

/// Read-only copy of a [`RetryState`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySnapshot {
    pub message_id: EntryId,
    pub stream: String,
    pub retry_count: u32,
    pub attempt_timestamps: Vec<DateTime<Utc>>,
    pub last_error: String,
}

impl From<&RetryState> for RetrySnapshot {
    fn from(state: &RetryState) -> Self {
        Self {
            message_id: state.message_id,
            stream: state.stream.clone(),
            retry_count: state.retry_count,
            attempt_timestamps: state.attempt_timestamps.clone(),
            last_error: state.last_error.clone(),
        }
    }
}

enum Step {
    Attempt {
        retry_count: u32,
        entry: StreamEntry,
        handler: Arc<dyn StreamHandler>,
        timestamp: DateTime<Utc>,
    },
    Exhausted(RetryState),
}

struct RetryInner {
    max_retry: u32,
    backoff: BackoffSchedule,
    policy: RetryShutdownPolicy,
    states: Mutex<HashMap<RetryKey, RetryState>>,
    acks: Arc<AckBatcher>,
    events: EventSink,
    dead_letter: Option<DeadLetterRouter>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// Schedules and tracks retry timelines.
#[derive(Clone)]
pub struct RetryScheduler {
    inner: Arc<RetryInner>,
}

impl RetryScheduler {
    pub fn new(
        config: &ConsumerConfig,
        acks: Arc<AckBatcher>,
        events: EventSink,
        dead_letter: Option<DeadLetterRouter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(RetryInner {
                max_retry: config.max_retry,
                backoff: config.backoff.clone(),
                policy: config.retry_shutdown,
                states: Mutex::new(HashMap::new()),
                acks,
                events,
                dead_letter,
                cancel,
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Start a retry timeline for an entry whose first delivery failed.
    ///
    /// Returns false when the entry already has a timeline, or when shutdown
    /// abandons retries and has begun.
    pub fn add(
        &self,
        stream: &str,
        entry: &StreamEntry,
        handler: Arc<dyn StreamHandler>,
        error: &anyhow::Error,
    ) -> bool {
        let inner = &self.inner;
        if inner.policy == RetryShutdownPolicy::Abandon && inner.cancel.is_cancelled() {
            debug!(stream, id = %entry.id, "Shutting down, not scheduling retry");
            return false;
        }

        let key = (stream.to_string(), entry.id);
        let in_flight = {
            let mut states = inner.states.lock();
            if states.contains_key(&key) {
                debug!(stream, id = %entry.id, "Retry already scheduled");
                return false;
            }
            states.insert(
                key.clone(),
                RetryState {
                    message_id: entry.id,
                    stream: stream.to_string(),
                    retry_count: 0,
                    attempt_timestamps: Vec::new(),
                    last_error: format!("{:#}", error),
                    entry: entry.clone(),
                    handler,
                },
            );
            states.len()
        };
        observe::set_retries_in_flight(in_flight);

        debug!(stream, id = %entry.id, max_retry = inner.max_retry, "Scheduled retry");
        inner.tracker.spawn(run_timeline(self.inner.clone(), key));
        true
    }

    /// Number of entries with a running timeline
    pub fn len(&self) -> usize {
        self.inner.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, stream: &str, id: EntryId) -> bool {
        self.inner
            .states
            .lock()
            .contains_key(&(stream.to_string(), id))
    }

    pub fn snapshot(&self, stream: &str, id: EntryId) -> Option<RetrySnapshot> {
        self.inner
            .states
            .lock()
            .get(&(stream.to_string(), id))
            .map(RetrySnapshot::from)
    }

    /// Stop accepting work and wait for running timelines.
    ///
    /// Under [`RetryShutdownPolicy::Drain`] every timeline runs to completion;
    /// under [`RetryShutdownPolicy::Abandon`] each one stops at its next
    /// backoff wait, leaving its entry pending in the group.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        let remaining = self.len();
        if remaining > 0 {
            info!(
                remaining,
                policy = ?self.inner.policy,
                "Waiting for retry timelines"
            );
        }
        self.inner.tracker.wait().await;
    }
}

impl RetryInner {
    fn next_step(&self, key: &RetryKey) -> Option<Step> {
        let mut states = self.states.lock();
        let state = states.get_mut(key)?;

        if state.retry_count >= self.max_retry {
            return states.remove(key).map(Step::Exhausted);
        }

        let timestamp = Utc::now();
        state.retry_count += 1;
        state.attempt_timestamps.push(timestamp);
        Some(Step::Attempt {
            retry_count: state.retry_count,
            entry: state.entry.clone(),
            handler: state.handler.clone(),
            timestamp,
        })
    }

    fn finish(&self, key: &RetryKey) {
        let in_flight = {
            let mut states = self.states.lock();
            states.remove(key);
            states.len()
        };
        observe::set_retries_in_flight(in_flight);
    }

    async fn exhausted(&self, state: RetryState) {
        observe::record_retry_exhausted();
        observe::set_retries_in_flight(self.states.lock().len());

        error!(
            stream = %state.stream,
            id = %state.message_id,
            retry_count = state.retry_count,
            error = %state.last_error,
            "Retries exhausted"
        );
        self.events.emit(ConsumerEvent::RetryFailed {
            error: state.last_error.clone(),
            stream: state.stream.clone(),
            entry: state.entry.clone(),
            retry_count: state.retry_count,
            attempt_timestamps: state.attempt_timestamps.clone(),
        });

        let Some(router) = &self.dead_letter else {
            return;
        };
        match router
            .forward(&state.stream, &state.entry, state.retry_count, &state.last_error)
            .await
        {
            Ok(_) => {
                self.acks.add(&state.stream, state.message_id);
                // Errors are logged and re-queued by the batcher.
                let _ = self.acks.flush().await;
            }
            Err(e) => {
                warn!(
                    stream = %state.stream,
                    id = %state.message_id,
                    dead_letter_stream = %router.stream(),
                    error = %e,
                    "Dead-letter forwarding failed, entry stays pending"
                );
            }
        }
    }
}

async fn run_timeline(inner: Arc<RetryInner>, key: RetryKey) {
    let (stream, id) = (key.0.as_str(), key.1);

    loop {
        let (retry_count, entry, handler) = match inner.next_step(&key) {
            None => return,
            Some(Step::Exhausted(state)) => {
                inner.exhausted(state).await;
                return;
            }
            Some(Step::Attempt {
                retry_count,
                entry,
                handler,
                timestamp,
            }) => {
                inner.events.emit(ConsumerEvent::Retry {
                    stream: stream.to_string(),
                    entry: entry.clone(),
                    retry_count,
                    timestamp,
                });
                (retry_count, entry, handler)
            }
        };

        let delay = inner.backoff.delay_for(retry_count);
        debug!(stream, id = %id, retry_count, delay = ?delay, "Waiting before retry");

        if inner.policy == RetryShutdownPolicy::Abandon {
            tokio::select! {
                biased;
                _ = inner.cancel.cancelled() => {
                    info!(stream, id = %id, retry_count, "Retry abandoned on shutdown");
                    inner.finish(&key);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        } else {
            tokio::time::sleep(delay).await;
        }

        observe::record_retry_attempt();
        let started = Instant::now();
        let result = handler.handle(stream, &entry).await;
        observe::record_handler(started.elapsed(), result.is_ok());

        match result {
            Ok(()) => {
                info!(stream, id = %id, retry_count, "Retry succeeded");
                inner.acks.add(stream, id);
                inner.finish(&key);
                // Errors are logged and re-queued by the batcher.
                let _ = inner.acks.flush().await;
                return;
            }
            Err(e) => {
                let error = format!("{:#}", e);
                warn!(stream, id = %id, retry_count, error = %error, "Retry attempt failed");
                if let Some(state) = inner.states.lock().get_mut(&key) {
                    state.last_error = error.clone();
                }
                inner.events.emit(ConsumerEvent::ProcessError {
                    error,
                    stream: stream.to_string(),
                    entry,
                    retry_count,
                });
            }
        }
    }
}
