use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Ordered list of waits applied between successive retry attempts
///
/// The n-th retry (1-based) waits `delays[n - 1]`; retries beyond the end of
/// the list reuse the last delay. Serialized as a list of milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

impl BackoffSchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Build a schedule from whole seconds
    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    /// Delay before the retry numbered `retry_count` (1-based)
    ///
    /// An empty schedule never waits. A count of zero is treated like the
    /// first retry.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if self.delays.is_empty() {
            return Duration::ZERO;
        }
        let idx = (retry_count as usize).min(self.delays.len()).saturating_sub(1);
        self.delays[idx]
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }
}

impl Default for BackoffSchedule {
    /// Short, medium and long waits: 15s, 1m, 15m
    fn default() -> Self {
        Self::from_secs(&[15, 60, 900])
    }
}

impl Serialize for BackoffSchedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let millis: Vec<u64> = self.delays.iter().map(|d| d.as_millis() as u64).collect();
        millis.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BackoffSchedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let millis = Vec::<u64>::deserialize(deserializer)?;
        Ok(Self::new(millis.into_iter().map(Duration::from_millis).collect()))
    }
}
