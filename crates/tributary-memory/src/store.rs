use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tributary_core::{
    error::{Result, TributaryError},
    traits::StreamLogClient,
    types::{EntryId, Fields, GroupStart, ReadOptions, StreamBatch, StreamCursor, StreamEntry, StreamRead},
};

/// An entry delivered to a group member but not yet acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub consumer: String,
    pub delivery_count: u64,
}

/// One recorded acknowledgment call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckCall {
    pub stream: String,
    pub group: String,
    pub ids: Vec<EntryId>,
}

/// Counters and call history of a memory log
#[derive(Debug, Clone, Default)]
pub struct MemoryLogStats {
    /// Successful `create_group` calls
    pub group_creations: u64,

    /// `read_group` calls, failed ones included
    pub reads: u64,

    /// Successful `ack` calls in order
    pub ack_calls: Vec<AckCall>,
}

#[derive(Debug, Default)]
struct GroupData {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingEntry>,
}

#[derive(Debug, Default)]
struct StreamData {
    entries: Vec<StreamEntry>,
    last_id: EntryId,
    groups: HashMap<String, GroupData>,
}

#[derive(Debug, Default)]
struct FailurePlan {
    reads: u32,
    acks: u32,
    appends: u32,
}

#[derive(Debug, Default)]
struct LogState {
    streams: HashMap<String, StreamData>,
    stats: MemoryLogStats,
    failures: FailurePlan,
}

#[derive(Default)]
struct Inner {
    state: Mutex<LogState>,
    appended: Notify,
}

/// In-memory stream log
///
/// Clones and duplicates share the same underlying log.
#[derive(Clone, Default)]
pub struct MemoryStreamLog {
    inner: Arc<Inner>,
}

impl MemoryStreamLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the call counters
    pub fn stats(&self) -> MemoryLogStats {
        self.inner.state.lock().stats.clone()
    }

    /// Acknowledgment calls issued so far, in order
    pub fn ack_calls(&self) -> Vec<AckCall> {
        self.inner.state.lock().stats.ack_calls.clone()
    }

    /// All entries of a stream
    pub fn entries(&self, stream: &str) -> Vec<StreamEntry> {
        self.inner
            .state
            .lock()
            .streams
            .get(stream)
            .map(|s| s.entries.clone())
            .unwrap_or_default()
    }

    /// Pending entries of a group, ordered by ID
    pub fn pending(&self, stream: &str, group: &str) -> Vec<(EntryId, PendingEntry)> {
        let state = self.inner.state.lock();
        state
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.iter().map(|(id, p)| (*id, p.clone())).collect())
            .unwrap_or_default()
    }

    /// Make the next `count` reads fail with a transport error
    pub fn fail_next_reads(&self, count: u32) {
        self.inner.state.lock().failures.reads = count;
    }

    /// Make the next `count` acknowledgment calls fail
    pub fn fail_next_acks(&self, count: u32) {
        self.inner.state.lock().failures.acks = count;
    }

    /// Make the next `count` appends fail
    pub fn fail_next_appends(&self, count: u32) {
        self.inner.state.lock().failures.appends = count;
    }
}

fn take_failure(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

fn no_group(stream: &str, group: &str) -> TributaryError {
    TributaryError::transport(
        "read_group",
        format!(
            "NOGROUP No such key '{}' or consumer group '{}'",
            stream, group
        ),
    )
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl StreamData {
    fn next_id(&self) -> EntryId {
        let ms = now_ms();
        if ms > self.last_id.ms {
            EntryId::new(ms, 0)
        } else {
            self.last_id.successor()
        }
    }

    fn entry(&self, id: EntryId) -> Option<&StreamEntry> {
        self.entries
            .binary_search_by(|e| e.id.cmp(&id))
            .ok()
            .map(|idx| &self.entries[idx])
    }
}

impl LogState {
    /// Serve one pass of a group read; never blocks
    fn collect(
        &mut self,
        group: &str,
        consumer: &str,
        reads: &[StreamRead],
        count: usize,
    ) -> Result<Vec<StreamBatch>> {
        let mut batches = Vec::new();

        for read in reads {
            let data = self
                .streams
                .get_mut(&read.stream)
                .ok_or_else(|| no_group(&read.stream, group))?;
            if !data.groups.contains_key(group) {
                return Err(no_group(&read.stream, group));
            }

            match read.cursor {
                StreamCursor::After(after) => {
                    let ids: Vec<EntryId> = data.groups[group]
                        .pending
                        .range(after.successor()..)
                        .filter(|(_, p)| p.consumer == consumer)
                        .map(|(id, _)| *id)
                        .take(count)
                        .collect();

                    let entries: Vec<StreamEntry> = ids
                        .iter()
                        .filter_map(|id| data.entry(*id).cloned())
                        .collect();

                    if let Some(group_data) = data.groups.get_mut(group) {
                        for id in &ids {
                            if let Some(p) = group_data.pending.get_mut(id) {
                                p.delivery_count += 1;
                            }
                        }
                    }

                    // History reads always answer for their stream, even empty.
                    batches.push(StreamBatch::new(read.stream.clone(), entries));
                }
                StreamCursor::Live => {
                    let last_delivered = data.groups[group].last_delivered;
                    let start = data.entries.partition_point(|e| e.id <= last_delivered);
                    let entries: Vec<StreamEntry> =
                        data.entries[start..].iter().take(count).cloned().collect();

                    if let (Some(last), Some(group_data)) =
                        (entries.last(), data.groups.get_mut(group))
                    {
                        group_data.last_delivered = last.id;
                        for entry in &entries {
                            group_data.pending.insert(
                                entry.id,
                                PendingEntry {
                                    consumer: consumer.to_string(),
                                    delivery_count: 1,
                                },
                            );
                        }
                    }

                    if !entries.is_empty() {
                        batches.push(StreamBatch::new(read.stream.clone(), entries));
                    }
                }
            }
        }

        Ok(batches)
    }
}

#[async_trait]
impl StreamLogClient for MemoryStreamLog {
    async fn exists(&self, stream: &str) -> Result<bool> {
        Ok(self.inner.state.lock().streams.contains_key(stream))
    }

    async fn group_exists(&self, stream: &str, group: &str) -> Result<bool> {
        let state = self.inner.state.lock();
        Ok(state
            .streams
            .get(stream)
            .map(|s| s.groups.contains_key(group))
            .unwrap_or(false))
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
        create_stream: bool,
    ) -> Result<()> {
        let mut state = self.inner.state.lock();

        if !state.streams.contains_key(stream) {
            if !create_stream {
                return Err(TributaryError::transport(
                    "create_group",
                    format!("stream '{}' does not exist", stream),
                ));
            }
            state.streams.insert(stream.to_string(), StreamData::default());
        }

        let data = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| TributaryError::transport("create_group", "stream vanished"))?;

        if data.groups.contains_key(group) {
            return Err(TributaryError::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        }

        let last_delivered = match start {
            GroupStart::Tail => data.last_id,
            GroupStart::Origin => EntryId::ORIGIN,
            GroupStart::At(id) => id,
        };
        data.groups.insert(
            group.to_string(),
            GroupData {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        state.stats.group_creations += 1;

        tracing::debug!(stream, group, start = %start, "Created consumer group");
        Ok(())
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &[StreamRead],
        options: &ReadOptions,
    ) -> Result<Vec<StreamBatch>> {
        let deadline = if options.block.is_zero() {
            None
        } else {
            Some(tokio::time::Instant::now() + options.block)
        };
        let replays_history = streams.iter().any(|r| !r.cursor.is_live());

        {
            let mut state = self.inner.state.lock();
            state.stats.reads += 1;
            if take_failure(&mut state.failures.reads) {
                return Err(TributaryError::transport(
                    "read_group",
                    "injected read failure",
                ));
            }
        }

        loop {
            // Register interest before looking, so an append in between still wakes us.
            let notified = self.inner.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                let batches = state.collect(group, consumer, streams, options.count)?;
                if replays_history || !batches.is_empty() {
                    return Ok(batches);
                }
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(Vec::new());
                    }
                }
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64> {
        let mut state = self.inner.state.lock();

        if take_failure(&mut state.failures.acks) {
            return Err(TributaryError::transport("ack", "injected ack failure"));
        }

        let acked = match state
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        {
            Some(group_data) => ids
                .iter()
                .filter(|id| group_data.pending.remove(id).is_some())
                .count() as u64,
            None => 0,
        };

        state.stats.ack_calls.push(AckCall {
            stream: stream.to_string(),
            group: group.to_string(),
            ids: ids.to_vec(),
        });

        Ok(acked)
    }

    async fn append(&self, stream: &str, fields: &Fields) -> Result<EntryId> {
        let id = {
            let mut state = self.inner.state.lock();

            if take_failure(&mut state.failures.appends) {
                return Err(TributaryError::transport("append", "injected append failure"));
            }

            let data = state.streams.entry(stream.to_string()).or_default();
            let id = data.next_id();
            data.entries.push(StreamEntry::new(id, fields.clone()));
            data.last_id = id;
            id
        };

        self.inner.appended.notify_waiters();
        Ok(id)
    }

    async fn duplicate(&self) -> Result<Arc<dyn StreamLogClient>> {
        Ok(Arc::new(self.clone()))
    }
}
