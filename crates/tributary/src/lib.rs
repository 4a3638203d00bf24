//! # Tributary
//!
//! Consumer groups over append-only stream logs with at-least-once delivery.
//!
//! A [`Consumer`] registers streams with a consumer group and runs one
//! read/dispatch loop over all of them:
//! - Each stream first replays this consumer's pending entries (recovery),
//!   then switches to entries never delivered to the group (live)
//! - Entries of a batch are handled one after another; successes are
//!   acknowledged in one call per stream after the batch
//! - Failures are retried on their own timeline with a backoff schedule;
//!   exhausted entries are reported and optionally forwarded to a
//!   dead-letter stream
//! - Progress and failures are published as [`ConsumerEvent`]s
//!
//! The transport is any [`StreamLogClient`](tributary_core::StreamLogClient):
//! `tributary-redis` for Redis Streams, `tributary-memory` for tests.
//!
//! ## Example
//!
//! ```ignore
//! use tributary::prelude::*;
//! use std::sync::Arc;
//!
//! let log = Arc::new(RedisStreamLog::connect("redis://127.0.0.1/").await?);
//! let client = StreamClient::new(log, ClientConfig::new("billing", "worker-1"));
//!
//! let consumer = client.create_consumer(ConsumerConfig::default()).await?;
//! consumer
//!     .listen(vec![StreamSpec::new(
//!         "orders",
//!         handler_fn(|stream, entry| async move {
//!             println!("{} {}: {:?}", stream, entry.id, entry.fields);
//!             Ok(())
//!         }),
//!     )])
//!     .await?;
//!
//! client.create_producer().append_json("orders", &order).await?;
//!
//! tokio::signal::ctrl_c().await?;
//! consumer.shutdown().await?;
//! ```

pub mod ack;
pub mod client;
pub mod consumer;
pub mod dead_letter;
pub mod events;
pub mod handler;
pub mod producer;
pub mod registrar;
pub mod retry;

pub mod prelude;

pub use ack::AckBatcher;
pub use client::StreamClient;
pub use consumer::{Consumer, StreamStatus};
pub use dead_letter::DeadLetterRouter;
pub use events::{ConsumerEvent, EventSink};
pub use handler::{handler_fn, FnHandler, StreamHandler, StreamSpec};
pub use producer::Producer;
pub use registrar::GroupRegistrar;
pub use retry::{RetryScheduler, RetrySnapshot, RetryState};
pub use tributary_core::{Result, TributaryError};
