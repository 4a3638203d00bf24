//! The consumer engine: one read/dispatch loop over every registered stream.
//!
//! Each stream starts in recovery, replaying this consumer's pending history
//! from its resume ID. The first read that returns nothing for the stream
//! switches it to live delivery for the rest of the engine's lifetime.

use crate::ack::AckBatcher;
use crate::dead_letter::DeadLetterRouter;
use crate::events::{ConsumerEvent, EventSink};
use crate::handler::{StreamHandler, StreamSpec};
use crate::producer::Producer;
use crate::registrar::GroupRegistrar;
use crate::retry::RetryScheduler;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tributary_core::{
    config::{ClientConfig, ConsumerConfig},
    error::{Result, TributaryError},
    observe,
    traits::StreamLogClient,
    types::{EntryId, ReadOptions, StreamBatch, StreamCursor, StreamRead},
};

/// Per-stream read position and handler.
struct StreamState {
    cursor: StreamCursor,
    last_acknowledged_id: EntryId,
    recovering: bool,
    handler: Arc<dyn StreamHandler>,
}

impl StreamState {
    fn new(resume_id: Option<EntryId>, handler: Arc<dyn StreamHandler>) -> Self {
        let start = resume_id.unwrap_or(EntryId::ORIGIN);
        Self {
            cursor: StreamCursor::After(start),
            last_acknowledged_id: start,
            recovering: true,
            handler,
        }
    }

    /// Move the cursor past a processed batch; returns true on the switch to live.
    fn advance(&mut self, last_id: Option<EntryId>) -> bool {
        if !self.recovering {
            return false;
        }
        match last_id {
            Some(id) => {
                self.cursor = StreamCursor::After(id);
                false
            }
            None => {
                self.recovering = false;
                self.cursor = StreamCursor::Live;
                true
            }
        }
    }
}

/// Snapshot of one registered stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStatus {
    pub cursor: StreamCursor,
    pub last_acknowledged_id: EntryId,
    pub recovering: bool,
}

struct ConsumerInner {
    client: ClientConfig,
    config: ConsumerConfig,
    reader: Arc<dyn StreamLogClient>,
    registrar: GroupRegistrar,
    acks: Arc<AckBatcher>,
    retries: RetryScheduler,
    events: EventSink,
    streams: Mutex<BTreeMap<String, StreamState>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
}

/// A member of a consumer group reading one or more streams.
///
/// Cheap to clone; clones drive the same engine.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

impl Consumer {
    /// Build a consumer from a validated config; `admin` serves group, ack
    /// and append calls while `reader` is reserved for the blocking group reads.
    pub(crate) fn new(
        admin: Arc<dyn StreamLogClient>,
        reader: Arc<dyn StreamLogClient>,
        client: ClientConfig,
        config: ConsumerConfig,
    ) -> Self {
        let events = EventSink::new(config.event_capacity);
        let cancel = CancellationToken::new();
        let acks = Arc::new(AckBatcher::new(
            admin.clone(),
            client.group_name.clone(),
            events.clone(),
        ));
        let dead_letter = config
            .dead_letter_stream
            .as_ref()
            .map(|stream| DeadLetterRouter::new(Producer::new(admin.clone()), stream.clone()));
        let retries = RetryScheduler::new(
            &config,
            acks.clone(),
            events.clone(),
            dead_letter,
            cancel.child_token(),
        );
        let registrar = GroupRegistrar::new(admin, client.group_name.clone(), config.group_start);

        Self {
            inner: Arc::new(ConsumerInner {
                client,
                config,
                reader,
                registrar,
                acks,
                retries,
                events,
                streams: Mutex::new(BTreeMap::new()),
                cancel,
                task: Mutex::new(None),
            }),
        }
    }

    /// Register streams and start the loop if it is not running yet.
    ///
    /// Each stream's group is created first; a registration failure is
    /// returned and leaves the streams registered before it in place.
    /// Registering a name twice keeps the first handler.
    pub async fn listen(&self, specs: Vec<StreamSpec>) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(TributaryError::Shutdown);
        }

        for spec in specs {
            self.inner.registrar.ensure_group(&spec.name).await?;

            let mut streams = self.inner.streams.lock();
            if streams.contains_key(&spec.name) {
                debug!(stream = %spec.name, "Stream already registered");
                continue;
            }
            info!(
                stream = %spec.name,
                group = %self.inner.client.group_name,
                consumer = %self.inner.client.consumer_name,
                resume_id = ?spec.resume_id,
                "Registered stream"
            );
            streams.insert(spec.name, StreamState::new(spec.resume_id, spec.handler));
        }

        self.start().await;
        Ok(())
    }

    /// Spawn the loop unless one is running; a loop that already exited is
    /// replaced.
    async fn start(&self) {
        if self.inner.streams.lock().is_empty() {
            return;
        }
        let finished = {
            let mut task = self.inner.task.lock();
            if matches!(&*task, Some(handle) if !handle.is_finished()) {
                return;
            }
            task.replace(tokio::spawn(run_loop(self.inner.clone())))
        };

        if let Some(handle) = finished {
            match handle.await {
                Ok(Ok(())) => debug!("Restarting consumer loop"),
                Ok(Err(e)) => warn!(error = %e, "Restarting consumer loop after it aborted"),
                Err(e) => warn!(error = %e, "Restarting consumer loop after it panicked"),
            }
        }
    }

    /// Stop reading, wait for the loop and for retries per the shutdown policy.
    ///
    /// Returns the loop's final result: `Ok` after a clean stop, the fatal
    /// error if the loop aborted.
    pub async fn shutdown(&self) -> Result<()> {
        info!(
            group = %self.inner.client.group_name,
            consumer = %self.inner.client.consumer_name,
            "Shutting down consumer"
        );
        self.inner.cancel.cancel();

        let handle = self.inner.task.lock().take();
        let result = match handle {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(TributaryError::Other(anyhow::anyhow!(
                    "consumer loop panicked: {}",
                    e
                ))),
            },
            None => Ok(()),
        };

        self.inner.retries.shutdown().await;
        self.inner.flush_acks().await;
        result
    }

    pub fn is_running(&self) -> bool {
        matches!(&*self.inner.task.lock(), Some(handle) if !handle.is_finished())
    }

    pub fn stream_status(&self, stream: &str) -> Option<StreamStatus> {
        let streams = self.inner.streams.lock();
        let state = streams.get(stream)?;
        let last_acknowledged_id = self
            .inner
            .acks
            .last_acknowledged(stream)
            .map_or(state.last_acknowledged_id, |id| id.max(state.last_acknowledged_id));
        Some(StreamStatus {
            cursor: state.cursor,
            last_acknowledged_id,
            recovering: state.recovering,
        })
    }

    /// Names of the registered streams
    pub fn streams(&self) -> Vec<String> {
        self.inner.streams.lock().keys().cloned().collect()
    }

    /// Queue an acknowledgment; sent with the next flush.
    pub fn ack(&self, stream: &str, id: EntryId) -> bool {
        self.inner.acks.add(stream, id)
    }

    /// Send queued acknowledgments now.
    pub async fn flush(&self) -> Result<usize> {
        self.inner.acks.flush().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsumerEvent> {
        self.inner.events.subscribe()
    }

    pub fn retries(&self) -> &RetryScheduler {
        &self.inner.retries
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.inner.config
    }
}

impl ConsumerInner {
    fn read_request(&self) -> Vec<StreamRead> {
        self.streams
            .lock()
            .iter()
            .map(|(name, state)| StreamRead::new(name.clone(), state.cursor))
            .collect()
    }

    async fn flush_acks(&self) {
        if let Err(e) = self.acks.flush().await {
            debug!(error = %e, "Acknowledgment flush incomplete");
        }
    }

    async fn process_batch(&self, batch: StreamBatch) -> Result<()> {
        let handler = self
            .streams
            .lock()
            .get(&batch.stream)
            .map(|state| state.handler.clone())
            .ok_or_else(|| TributaryError::MissingStreamState(batch.stream.clone()))?;

        for entry in &batch.entries {
            let started = Instant::now();
            let result = handler.handle(&batch.stream, entry).await;
            observe::record_handler(started.elapsed(), result.is_ok());

            match result {
                Ok(()) => {
                    debug!(stream = %batch.stream, id = %entry.id, "Processed entry");
                    self.acks.add(&batch.stream, entry.id);
                }
                Err(e) => {
                    let error = format!("{:#}", e);
                    warn!(stream = %batch.stream, id = %entry.id, error = %error, "Handler failed");
                    self.events.emit(ConsumerEvent::ProcessError {
                        error,
                        stream: batch.stream.clone(),
                        entry: entry.clone(),
                        retry_count: 0,
                    });
                    if self.config.max_retry == 0 {
                        continue;
                    }
                    self.retries.add(&batch.stream, entry, handler.clone(), &e);
                }
            }
        }

        self.flush_acks().await;

        let mut streams = self.streams.lock();
        let state = streams
            .get_mut(&batch.stream)
            .ok_or_else(|| TributaryError::MissingStreamState(batch.stream.clone()))?;
        if state.advance(batch.last_id()) {
            info!(stream = %batch.stream, "Recovery complete, switching to live entries");
        }
        Ok(())
    }
}

async fn run_loop(inner: Arc<ConsumerInner>) -> Result<()> {
    let group = inner.client.group_name.as_str();
    let consumer = inner.client.consumer_name.as_str();
    let options = ReadOptions {
        block: inner.config.block,
        count: inner.config.max_count,
    };
    info!(group, consumer, "Consumer loop started");

    let mut read_failures: u32 = 0;
    let result = 'read: loop {
        if inner.cancel.is_cancelled() {
            break Ok(());
        }

        let reads = inner.read_request();
        let read = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break Ok(()),
            read = inner.reader.read_group(group, consumer, &reads, &options) => read,
        };

        let batches = match read {
            Ok(batches) => {
                read_failures = 0;
                observe::record_read(batches.iter().map(|b| b.entries.len()).sum(), true);
                batches
            }
            Err(e) => {
                read_failures += 1;
                observe::record_read(0, false);
                warn!(error = %e, consecutive_failures = read_failures, "Group read failed");
                inner.events.emit(ConsumerEvent::TransportError {
                    operation: "read_group".to_string(),
                    error: e.to_string(),
                });

                if let Some(max) = inner.config.max_consecutive_read_failures {
                    if read_failures >= max {
                        break Err(e);
                    }
                }

                tokio::select! {
                    biased;
                    _ = inner.cancel.cancelled() => break Ok(()),
                    _ = tokio::time::sleep(inner.config.transport_backoff) => {}
                }
                continue;
            }
        };

        if batches.is_empty() {
            inner.flush_acks().await;
            tokio::task::yield_now().await;
            continue;
        }

        for batch in batches {
            if inner.cancel.is_cancelled() {
                break 'read Ok(());
            }
            if let Err(e) = inner.process_batch(batch).await {
                break 'read Err(e);
            }
        }
    };

    inner.flush_acks().await;
    match &result {
        Ok(()) => info!(group, consumer, "Consumer loop stopped"),
        Err(e) => error!(group, consumer, error = %e, "Consumer loop aborted"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    fn noop() -> Arc<dyn StreamHandler> {
        Arc::new(handler_fn(|_stream, _entry| async { Ok(()) }))
    }

    #[test]
    fn test_state_starts_recovering_from_origin() {
        let state = StreamState::new(None, noop());
        assert!(state.recovering);
        assert_eq!(state.cursor, StreamCursor::After(EntryId::ORIGIN));
    }

    #[test]
    fn test_state_resume_id() {
        let state = StreamState::new(Some(EntryId::new(9, 3)), noop());
        assert_eq!(state.cursor, StreamCursor::After(EntryId::new(9, 3)));
        assert_eq!(state.last_acknowledged_id, EntryId::new(9, 3));
    }

    #[test]
    fn test_recovery_transition_happens_once() {
        let mut state = StreamState::new(None, noop());

        assert!(!state.advance(Some(EntryId::new(5, 0))));
        assert_eq!(state.cursor, StreamCursor::After(EntryId::new(5, 0)));
        assert!(state.recovering);

        assert!(state.advance(None));
        assert_eq!(state.cursor, StreamCursor::Live);
        assert!(!state.recovering);

        assert!(!state.advance(None));
        assert!(!state.advance(Some(EntryId::new(8, 0))));
        assert_eq!(state.cursor, StreamCursor::Live);
    }
}
