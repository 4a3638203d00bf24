//! Tributary Core: types and traits shared by the tributary crates
//!
//! This crate defines the vocabulary of the consumer-group client:
//! - Entry identifiers, entries and read cursors of an append-only stream log
//! - The `StreamLogClient` trait implemented by transport backends
//!   (in-memory, Redis Streams)
//! - Consumer and client configuration
//! - The crate-wide error type
//!
//! The consumer engine itself lives in the `tributary` crate.

pub mod config;
pub mod error;
pub mod observe;
pub mod traits;
pub mod types;

pub use config::{BackoffSchedule, ClientConfig, ConsumerConfig, RetryShutdownPolicy};
pub use error::{Result, TributaryError};
pub use traits::StreamLogClient;
pub use types::{
    EntryId, Fields, GroupStart, ReadOptions, StreamBatch, StreamCursor, StreamEntry, StreamRead,
};
