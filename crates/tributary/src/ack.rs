//! Batched acknowledgment of processed entries.

use crate::events::{ConsumerEvent, EventSink};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use tributary_core::{
    error::{Result, TributaryError},
    observe,
    traits::StreamLogClient,
    types::EntryId,
};

#[derive(Default)]
struct PendingAcks {
    streams: BTreeMap<String, Vec<EntryId>>,
    queued: HashSet<(String, EntryId)>,
}

impl PendingAcks {
    fn add(&mut self, stream: &str, id: EntryId) -> bool {
        if !self.queued.insert((stream.to_string(), id)) {
            return false;
        }
        self.streams.entry(stream.to_string()).or_default().push(id);
        true
    }

    fn take(&mut self) -> BTreeMap<String, Vec<EntryId>> {
        self.queued.clear();
        std::mem::take(&mut self.streams)
    }

    /// Put back IDs whose acknowledgment failed, ahead of anything queued since
    fn restore(&mut self, stream: &str, ids: Vec<EntryId>) {
        let mut merged: Vec<EntryId> = ids
            .into_iter()
            .filter(|id| self.queued.insert((stream.to_string(), *id)))
            .collect();
        if let Some(newer) = self.streams.remove(stream) {
            merged.extend(newer);
        }
        if !merged.is_empty() {
            self.streams.insert(stream.to_string(), merged);
        }
    }

    fn len(&self) -> usize {
        self.queued.len()
    }
}

/// Accumulates entry IDs to acknowledge and sends them one call per stream.
///
/// Adding an ID that is already queued is a no-op. A flush drains the whole
/// queue; a stream whose acknowledgment fails gets its IDs back for the next
/// flush.
pub struct AckBatcher {
    log: Arc<dyn StreamLogClient>,
    group: String,
    pending: Mutex<PendingAcks>,
    acknowledged: Mutex<HashMap<String, EntryId>>,
    events: EventSink,
}

impl AckBatcher {
    pub fn new(log: Arc<dyn StreamLogClient>, group: impl Into<String>, events: EventSink) -> Self {
        Self {
            log,
            group: group.into(),
            pending: Mutex::new(PendingAcks::default()),
            acknowledged: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Queue an ID; returns false if it was already queued
    pub fn add(&self, stream: &str, id: EntryId) -> bool {
        self.pending.lock().add(stream, id)
    }

    /// Number of queued IDs across all streams
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// IDs queued for one stream, in insertion order
    pub fn pending_for(&self, stream: &str) -> Vec<EntryId> {
        self.pending
            .lock()
            .streams
            .get(stream)
            .cloned()
            .unwrap_or_default()
    }

    /// Highest ID the log has confirmed for a stream
    pub fn last_acknowledged(&self, stream: &str) -> Option<EntryId> {
        self.acknowledged.lock().get(stream).copied()
    }

    /// Send every queued ID, one acknowledgment call per stream.
    ///
    /// Returns the number of IDs acknowledged. Every stream is attempted even
    /// when an earlier one fails; the first failure is returned after the
    /// failed IDs have been re-queued.
    pub async fn flush(&self) -> Result<usize> {
        let batch = self.pending.lock().take();
        if batch.is_empty() {
            return Ok(0);
        }

        let mut acked = 0;
        let mut first_error: Option<TributaryError> = None;

        for (stream, ids) in batch {
            match self.log.ack(&stream, &self.group, &ids).await {
                Ok(confirmed) => {
                    observe::record_ack(ids.len(), true);
                    debug!(
                        stream = %stream,
                        ids = ids.len(),
                        confirmed,
                        "Acknowledged entries"
                    );
                    acked += ids.len();
                    if let Some(max) = ids.iter().max().copied() {
                        let mut acknowledged = self.acknowledged.lock();
                        let last = acknowledged.entry(stream).or_insert(max);
                        if max > *last {
                            *last = max;
                        }
                    }
                }
                Err(e) => {
                    observe::record_ack(ids.len(), false);
                    warn!(
                        stream = %stream,
                        ids = ids.len(),
                        error = %e,
                        "Acknowledgment failed, re-queueing"
                    );
                    self.events.emit(ConsumerEvent::TransportError {
                        operation: "ack".to_string(),
                        error: e.to_string(),
                    });
                    self.pending.lock().restore(&stream, ids);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(acked),
        }
    }
}
