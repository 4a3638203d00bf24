pub mod backoff;
pub mod client;
pub mod consumer;

pub use backoff::BackoffSchedule;
pub use client::ClientConfig;
pub use consumer::{ConsumerConfig, RetryShutdownPolicy};
