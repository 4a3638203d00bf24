//! Convenience re-exports for common types.

pub use crate::ack::AckBatcher;
pub use crate::client::StreamClient;
pub use crate::consumer::{Consumer, StreamStatus};
pub use crate::events::ConsumerEvent;
pub use crate::handler::{handler_fn, StreamHandler, StreamSpec};
pub use crate::producer::Producer;
pub use crate::retry::{RetryScheduler, RetrySnapshot};
pub use tributary_core::{
    BackoffSchedule, ClientConfig, ConsumerConfig, EntryId, Fields, GroupStart, Result,
    RetryShutdownPolicy, StreamEntry, StreamLogClient, TributaryError,
};
