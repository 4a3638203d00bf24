//! Optional metrics instrumentation for tributary.
//!
//! When the `observe` feature is enabled, the consumer engine emits counters
//! and histograms via the [`metrics`] crate. A downstream application must
//! install a metrics recorder (e.g. `metrics-exporter-prometheus`) to collect
//! the data.
//!
//! When the feature is **not** enabled every function in this module is a
//! zero-cost no-op.

/// Record the outcome of one handler invocation.
///
/// - `tributary.handler.calls_total` – counter with `outcome` label (`ok` / `fail`)
/// - `tributary.handler.duration_seconds` – histogram
#[inline]
pub fn record_handler(duration: std::time::Duration, success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("tributary.handler.calls_total", "outcome" => outcome).increment(1);
        metrics::histogram!("tributary.handler.duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, success);
    }
}

/// Record a group read.
///
/// - `tributary.read.total` – counter with `outcome` label
/// - `tributary.read.entries_total` – counter of entries returned
#[inline]
pub fn record_read(entries: usize, success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("tributary.read.total", "outcome" => outcome).increment(1);
        metrics::counter!("tributary.read.entries_total").increment(entries as u64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (entries, success);
    }
}

/// Record an acknowledgment call.
///
/// - `tributary.ack.calls_total` – counter with `outcome` label
/// - `tributary.ack.ids_total` – counter of IDs sent
#[inline]
pub fn record_ack(ids: usize, success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("tributary.ack.calls_total", "outcome" => outcome).increment(1);
        metrics::counter!("tributary.ack.ids_total").increment(ids as u64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (ids, success);
    }
}

/// Record the start of a retry attempt.
///
/// - `tributary.retry.attempts_total` – counter
#[inline]
pub fn record_retry_attempt() {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("tributary.retry.attempts_total").increment(1);
    }
}

/// Record an entry whose retries were exhausted.
///
/// - `tributary.retry.exhausted_total` – counter
#[inline]
pub fn record_retry_exhausted() {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("tributary.retry.exhausted_total").increment(1);
    }
}

/// Set the number of in-flight retry timelines.
///
/// - `tributary.retry.in_flight` – gauge
#[inline]
pub fn set_retries_in_flight(count: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::gauge!("tributary.retry.in_flight").set(count as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = count;
    }
}
