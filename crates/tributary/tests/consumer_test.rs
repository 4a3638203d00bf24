use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tributary::prelude::*;
use tributary_core::types::{ReadOptions, StreamBatch, StreamCursor, StreamRead};
use tributary_memory::MemoryStreamLog;

fn setup() -> (MemoryStreamLog, StreamClient) {
    let log = MemoryStreamLog::new();
    let client = StreamClient::new(Arc::new(log.clone()), ClientConfig::new("workers", "c1"));
    (log, client)
}

fn config() -> ConsumerConfig {
    ConsumerConfig::default()
        .with_block(Duration::from_millis(100))
        .with_backoff(BackoffSchedule::from_secs(&[1]))
}

fn fields(key: &str, value: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert(key.to_string(), value.to_string());
    fields
}

type Seen = Arc<Mutex<Vec<EntryId>>>;

/// Records every entry it sees and succeeds
fn recorder(seen: Seen) -> impl StreamHandler {
    handler_fn(move |_stream, entry| {
        let seen = seen.clone();
        async move {
            seen.lock().push(entry.id);
            Ok(())
        }
    })
}

/// Counts calls and always fails
fn failing(calls: Arc<AtomicU32>) -> impl StreamHandler {
    handler_fn(move |_stream, _entry| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("handler down")
        }
    })
}

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn next_event(rx: &mut broadcast::Receiver<ConsumerEvent>) -> ConsumerEvent {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("no event in time")
        .expect("event channel closed")
}

#[tokio::test(start_paused = true)]
async fn test_listen_creates_group_once() {
    let (log, client) = setup();
    let consumer = client.create_consumer(config()).await.unwrap();
    let seen = Seen::default();

    consumer
        .listen(vec![StreamSpec::new("orders", recorder(seen.clone()))])
        .await
        .unwrap();
    consumer
        .listen(vec![StreamSpec::new("orders", recorder(seen.clone()))])
        .await
        .unwrap();

    assert_eq!(log.stats().group_creations, 1);
    assert!(log.group_exists("orders", "workers").await.unwrap());
    assert_eq!(consumer.streams(), vec!["orders".to_string()]);
    assert!(consumer.is_running());

    consumer.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_group_starts_at_tail() {
    let (log, client) = setup();
    log.append("orders", &fields("n", "old")).await.unwrap();

    let consumer = client.create_consumer(config()).await.unwrap();
    let seen = Seen::default();
    consumer
        .listen(vec![StreamSpec::new("orders", recorder(seen.clone()))])
        .await
        .unwrap();

    let producer = client.create_producer();
    let new_id = producer.append("orders", &fields("n", "new")).await.unwrap();

    wait_for("new entry", || seen.lock().len() == 1).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(*seen.lock(), vec![new_id]);

    consumer.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_live_entries_processed_in_order_and_acked() {
    let (log, client) = setup();
    let consumer = client.create_consumer(config()).await.unwrap();
    let seen = Seen::default();
    consumer
        .listen(vec![StreamSpec::new("orders", recorder(seen.clone()))])
        .await
        .unwrap();

    let producer = client.create_producer();
    let mut appended = Vec::new();
    for n in 0..3 {
        appended.push(
            producer
                .append("orders", &fields("n", &n.to_string()))
                .await
                .unwrap(),
        );
    }

    wait_for("all entries", || seen.lock().len() == 3).await;
    wait_for("acks", || log.pending("orders", "workers").is_empty()).await;
    assert_eq!(*seen.lock(), appended);

    let status = consumer.stream_status("orders").unwrap();
    assert!(!status.recovering);
    assert_eq!(status.cursor, StreamCursor::Live);
    assert_eq!(status.last_acknowledged_id, appended[2]);

    consumer.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_recovery_replays_pending_entries_after_restart() {
    let (log, client) = setup();

    // First run: every entry fails terminally and stays pending.
    let calls = Arc::new(AtomicU32::new(0));
    let first = client
        .create_consumer(config().with_max_retry(0))
        .await
        .unwrap();
    first
        .listen(vec![StreamSpec::new("orders", failing(calls.clone()))])
        .await
        .unwrap();

    let producer = client.create_producer();
    let a = producer.append("orders", &fields("n", "a")).await.unwrap();
    let b = producer.append("orders", &fields("n", "b")).await.unwrap();

    wait_for("both failures", || calls.load(Ordering::SeqCst) == 2).await;
    first.shutdown().await.unwrap();
    assert_eq!(log.pending("orders", "workers").len(), 2);

    // Second run under the same consumer name replays them.
    let seen = Seen::default();
    let second = client.create_consumer(config()).await.unwrap();
    second
        .listen(vec![StreamSpec::new("orders", recorder(seen.clone()))])
        .await
        .unwrap();

    wait_for("replay", || seen.lock().len() == 2).await;
    wait_for("acks", || log.pending("orders", "workers").is_empty()).await;
    assert_eq!(*seen.lock(), vec![a, b]);
    wait_for("live", || {
        second
            .stream_status("orders")
            .map(|s| !s.recovering)
            .unwrap_or(false)
    })
    .await;

    second.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_resume_id_skips_older_history() {
    let (log, client) = setup();

    let calls = Arc::new(AtomicU32::new(0));
    let first = client
        .create_consumer(config().with_max_retry(0))
        .await
        .unwrap();
    first
        .listen(vec![StreamSpec::new("orders", failing(calls.clone()))])
        .await
        .unwrap();
    let producer = client.create_producer();
    let a = producer.append("orders", &fields("n", "a")).await.unwrap();
    let b = producer.append("orders", &fields("n", "b")).await.unwrap();
    wait_for("both failures", || calls.load(Ordering::SeqCst) == 2).await;
    first.shutdown().await.unwrap();

    let seen = Seen::default();
    let second = client.create_consumer(config()).await.unwrap();
    second
        .listen(vec![StreamSpec::new("orders", recorder(seen.clone())).resume_from(a)])
        .await
        .unwrap();

    wait_for("replay", || seen.lock().len() == 1).await;
    wait_for("live", || {
        second
            .stream_status("orders")
            .map(|s| !s.recovering)
            .unwrap_or(false)
    })
    .await;
    assert_eq!(*seen.lock(), vec![b]);
    assert_eq!(log.pending("orders", "workers").len(), 1);

    second.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_zero_max_retry_is_terminal() {
    let (log, client) = setup();
    let consumer = client
        .create_consumer(config().with_max_retry(0))
        .await
        .unwrap();
    let mut events = consumer.subscribe();
    let calls = Arc::new(AtomicU32::new(0));
    consumer
        .listen(vec![StreamSpec::new("orders", failing(calls.clone()))])
        .await
        .unwrap();

    let id = client
        .create_producer()
        .append("orders", &fields("n", "a"))
        .await
        .unwrap();

    match next_event(&mut events).await {
        ConsumerEvent::ProcessError {
            entry, retry_count, ..
        } => {
            assert_eq!(entry.id, id);
            assert_eq!(retry_count, 0);
        }
        other => panic!("unexpected event {:?}", other),
    }

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(consumer.retries().is_empty());
    assert_eq!(log.pending("orders", "workers").len(), 1);

    // Terminal failures can still be acknowledged by hand.
    assert!(consumer.ack("orders", id));
    assert_eq!(consumer.flush().await.unwrap(), 1);
    assert!(log.pending("orders", "workers").is_empty());

    consumer.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_read_failure_emits_transport_error_and_continues() {
    let (log, client) = setup();
    let consumer = client.create_consumer(config()).await.unwrap();
    let mut events = consumer.subscribe();
    let seen = Seen::default();

    log.fail_next_reads(2);
    consumer
        .listen(vec![StreamSpec::new("orders", recorder(seen.clone()))])
        .await
        .unwrap();

    for _ in 0..2 {
        match next_event(&mut events).await {
            ConsumerEvent::TransportError { operation, .. } => assert_eq!(operation, "read_group"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    client
        .create_producer()
        .append("orders", &fields("n", "a"))
        .await
        .unwrap();
    wait_for("entry after read failures", || seen.lock().len() == 1).await;
    assert!(consumer.is_running());

    consumer.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_read_failures_stop_the_loop() {
    let (log, client) = setup();
    let consumer = client
        .create_consumer(config().with_max_consecutive_read_failures(3))
        .await
        .unwrap();

    log.fail_next_reads(10);
    consumer
        .listen(vec![StreamSpec::new("orders", recorder(Seen::default()))])
        .await
        .unwrap();

    wait_for("loop exit", || !consumer.is_running()).await;
    let err = consumer.shutdown().await.unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test(start_paused = true)]
async fn test_listen_restarts_an_exited_loop() {
    let (log, client) = setup();
    let consumer = client
        .create_consumer(config().with_max_consecutive_read_failures(1))
        .await
        .unwrap();

    log.fail_next_reads(1);
    consumer
        .listen(vec![StreamSpec::new("orders", recorder(Seen::default()))])
        .await
        .unwrap();
    wait_for("loop exit", || !consumer.is_running()).await;

    let seen = Seen::default();
    consumer
        .listen(vec![StreamSpec::new("refunds", recorder(seen.clone()))])
        .await
        .unwrap();
    assert!(consumer.is_running());

    let id = client
        .create_producer()
        .append("refunds", &fields("n", "r1"))
        .await
        .unwrap();
    wait_for("refund handled", || seen.lock().contains(&id)).await;

    consumer.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_ack_is_retried_on_next_flush() {
    let (log, client) = setup();
    let consumer = client.create_consumer(config()).await.unwrap();
    let mut events = consumer.subscribe();
    let seen = Seen::default();
    consumer
        .listen(vec![StreamSpec::new("orders", recorder(seen.clone()))])
        .await
        .unwrap();

    log.fail_next_acks(1);
    client
        .create_producer()
        .append("orders", &fields("n", "a"))
        .await
        .unwrap();

    match next_event(&mut events).await {
        ConsumerEvent::TransportError { operation, .. } => assert_eq!(operation, "ack"),
        other => panic!("unexpected event {:?}", other),
    }
    wait_for("ack retry", || log.pending("orders", "workers").is_empty()).await;
    assert_eq!(seen.lock().len(), 1);

    consumer.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_retries() {
    let (log, client) = setup();
    let consumer = client
        .create_consumer(config().with_backoff(BackoffSchedule::from_secs(&[30])))
        .await
        .unwrap();
    let mut events = consumer.subscribe();

    let calls = Arc::new(AtomicU32::new(0));
    let handler_calls = calls.clone();
    consumer
        .listen(vec![StreamSpec::new(
            "orders",
            handler_fn(move |_stream, _entry| {
                let calls = handler_calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        anyhow::bail!("first attempt fails");
                    }
                    Ok(())
                }
            }),
        )])
        .await
        .unwrap();

    client
        .create_producer()
        .append("orders", &fields("n", "a"))
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        ConsumerEvent::ProcessError { .. }
    ));

    consumer.shutdown().await.unwrap();

    assert!(!consumer.is_running());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(log.pending("orders", "workers").is_empty());
    assert!(matches!(
        consumer.listen(vec![]).await,
        Err(TributaryError::Shutdown)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_abandons_retries() {
    let (log, client) = setup();
    let consumer = client
        .create_consumer(
            config()
                .with_backoff(BackoffSchedule::from_secs(&[30]))
                .with_retry_shutdown(RetryShutdownPolicy::Abandon),
        )
        .await
        .unwrap();
    let mut events = consumer.subscribe();
    let calls = Arc::new(AtomicU32::new(0));
    consumer
        .listen(vec![StreamSpec::new("orders", failing(calls.clone()))])
        .await
        .unwrap();

    client
        .create_producer()
        .append("orders", &fields("n", "a"))
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        ConsumerEvent::ProcessError { .. }
    ));

    let started = tokio::time::Instant::now();
    consumer.shutdown().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(consumer.retries().is_empty());
    assert_eq!(log.pending("orders", "workers").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_consumers_in_one_group_share_entries() {
    let log = MemoryStreamLog::new();
    let shared: Arc<dyn StreamLogClient> = Arc::new(log.clone());
    let seen = Seen::default();

    let mut consumers = Vec::new();
    for name in ["c1", "c2"] {
        let client = StreamClient::new(shared.clone(), ClientConfig::new("workers", name));
        let consumer = client.create_consumer(config()).await.unwrap();
        consumer
            .listen(vec![StreamSpec::new("orders", recorder(seen.clone()))])
            .await
            .unwrap();
        consumers.push(consumer);
    }

    let producer = Producer::new(shared);
    for n in 0..6 {
        producer
            .append("orders", &fields("n", &n.to_string()))
            .await
            .unwrap();
    }

    wait_for("all entries", || seen.lock().len() == 6).await;
    wait_for("acks", || log.pending("orders", "workers").is_empty()).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let mut ids = seen.lock().clone();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 6);
    assert_eq!(log.stats().group_creations, 1);

    for consumer in consumers {
        consumer.shutdown().await.unwrap();
    }
}

/// Answers every read with an extra batch for a stream nobody registered
struct RogueLog(MemoryStreamLog);

#[async_trait]
impl StreamLogClient for RogueLog {
    async fn exists(&self, stream: &str) -> Result<bool> {
        self.0.exists(stream).await
    }
    async fn group_exists(&self, stream: &str, group: &str) -> Result<bool> {
        self.0.group_exists(stream, group).await
    }
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
        create_stream: bool,
    ) -> Result<()> {
        self.0.create_group(stream, group, start, create_stream).await
    }
    async fn read_group(
        &self,
        _group: &str,
        _consumer: &str,
        _streams: &[StreamRead],
        _options: &ReadOptions,
    ) -> Result<Vec<StreamBatch>> {
        let entry = StreamEntry::new(EntryId::new(1, 0), Fields::new());
        Ok(vec![StreamBatch::new("ghost", vec![entry])])
    }
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64> {
        self.0.ack(stream, group, ids).await
    }
    async fn append(&self, stream: &str, fields: &Fields) -> Result<EntryId> {
        self.0.append(stream, fields).await
    }
    async fn duplicate(&self) -> Result<Arc<dyn StreamLogClient>> {
        Ok(Arc::new(RogueLog(self.0.clone())))
    }
}

#[tokio::test(start_paused = true)]
async fn test_batch_for_unregistered_stream_is_fatal() {
    let client = StreamClient::new(
        Arc::new(RogueLog(MemoryStreamLog::new())),
        ClientConfig::new("workers", "c1"),
    );
    let consumer = client.create_consumer(config()).await.unwrap();
    consumer
        .listen(vec![StreamSpec::new("orders", recorder(Seen::default()))])
        .await
        .unwrap();

    wait_for("loop exit", || !consumer.is_running()).await;
    match consumer.shutdown().await {
        Err(TributaryError::MissingStreamState(stream)) => assert_eq!(stream, "ghost"),
        other => panic!("unexpected result {:?}", other),
    }
}
