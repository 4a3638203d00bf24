//! In-memory stream log implementation
//!
//! Provides an in-process append-only stream log with the consumer-group
//! semantics the engine relies on:
//! - Log-assigned, strictly increasing entry IDs
//! - Group cursors created at the tail, the origin, or a given ID
//! - Per-consumer pending-entries lists, replayed by history reads
//! - Blocking live reads woken by appends
//!
//! It backs the workspace tests and suits embedded, single-process use.
//! Call recording and failure injection make transport behavior observable.

mod store;

pub use store::{AckCall, MemoryLogStats, MemoryStreamLog, PendingEntry};
