use super::backoff::BackoffSchedule;
use crate::error::{Result, TributaryError};
use crate::types::GroupStart;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happens to in-flight retries when a consumer shuts down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RetryShutdownPolicy {
    /// Let every retry timeline run to success or exhaustion
    #[default]
    Drain,

    /// Stop retries at their next backoff wait without acknowledging
    Abandon,
}

/// Configuration of a consumer engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Maximum entries read per stream and call (default: 1)
    #[serde(default = "default_max_count")]
    pub max_count: usize,

    /// How long a read waits for new entries (default: 5s, zero waits forever)
    #[serde(default = "default_block", with = "duration_ms")]
    pub block: Duration,

    /// Retries per failed entry before it is given up (default: 3)
    ///
    /// Zero disables retries: a failed entry is left unacknowledged.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    /// Waits between retry attempts
    #[serde(default)]
    pub backoff: BackoffSchedule,

    /// Start position of groups created on `listen` (default: tail)
    #[serde(default)]
    pub group_start: GroupStart,

    /// Pause after a failed read before reading again (default: 1s)
    #[serde(default = "default_transport_backoff", with = "duration_ms")]
    pub transport_backoff: Duration,

    /// Stop the loop after this many consecutive read failures (default: never)
    #[serde(default)]
    pub max_consecutive_read_failures: Option<u32>,

    /// Fate of in-flight retries on shutdown
    #[serde(default)]
    pub retry_shutdown: RetryShutdownPolicy,

    /// Stream receiving entries whose retries are exhausted
    #[serde(default)]
    pub dead_letter_stream: Option<String>,

    /// Buffered observability events per subscriber (default: 1024)
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_count: default_max_count(),
            block: default_block(),
            max_retry: default_max_retry(),
            backoff: BackoffSchedule::default(),
            group_start: GroupStart::default(),
            transport_backoff: default_transport_backoff(),
            max_consecutive_read_failures: None,
            retry_shutdown: RetryShutdownPolicy::default(),
            dead_letter_stream: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl ConsumerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = max_count;
        self
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffSchedule) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_group_start(mut self, start: GroupStart) -> Self {
        self.group_start = start;
        self
    }

    pub fn with_transport_backoff(mut self, backoff: Duration) -> Self {
        self.transport_backoff = backoff;
        self
    }

    pub fn with_max_consecutive_read_failures(mut self, max: u32) -> Self {
        self.max_consecutive_read_failures = Some(max);
        self
    }

    pub fn with_retry_shutdown(mut self, policy: RetryShutdownPolicy) -> Self {
        self.retry_shutdown = policy;
        self
    }

    pub fn with_dead_letter_stream(mut self, stream: impl Into<String>) -> Self {
        self.dead_letter_stream = Some(stream.into());
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_count == 0 {
            return Err(TributaryError::Config("max_count must be at least 1".into()));
        }
        if self.event_capacity == 0 {
            return Err(TributaryError::Config(
                "event_capacity must be at least 1".into(),
            ));
        }
        if let Some(stream) = &self.dead_letter_stream {
            if stream.is_empty() {
                return Err(TributaryError::Config(
                    "dead_letter_stream must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

fn default_max_count() -> usize {
    1
}

fn default_block() -> Duration {
    Duration::from_secs(5)
}

fn default_max_retry() -> u32 {
    3
}

fn default_transport_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_event_capacity() -> usize {
    1024
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConsumerConfig::default();
        assert_eq!(config.max_count, 1);
        assert_eq!(config.max_retry, 3);
        assert_eq!(config.backoff.delays().len(), 3);
        assert_eq!(config.group_start, GroupStart::Tail);
        assert_eq!(config.retry_shutdown, RetryShutdownPolicy::Drain);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ConsumerConfig::new().with_max_count(0).validate().is_err());
        assert!(ConsumerConfig::new().with_event_capacity(0).validate().is_err());
        assert!(ConsumerConfig::new()
            .with_dead_letter_stream("")
            .validate()
            .is_err());
    }

    #[test]
    fn test_deserialize_partial_document() {
        let config: ConsumerConfig = serde_json::from_str(
            r#"{ "max_count": 10, "block": 250, "backoff": [100, 200], "dead_letter_stream": "dlq" }"#,
        )
        .unwrap();

        assert_eq!(config.max_count, 10);
        assert_eq!(config.block, Duration::from_millis(250));
        assert_eq!(config.backoff.delay_for(5), Duration::from_millis(200));
        assert_eq!(config.max_retry, 3);
        assert_eq!(config.transport_backoff, Duration::from_secs(1));
        assert_eq!(config.dead_letter_stream.as_deref(), Some("dlq"));
    }
}
