//! Traffic counters and a latency histogram shared by connections.

use histogram::{AtomicHistogram, Histogram};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

const ORDER_TYPE: Ordering = Ordering::Relaxed;

/// Error of reading or recording a latency.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum MetricsError {
    /// The histogram rejected the operation.
    #[error("Histogram error: {0}")]
    HistogramError(Arc<dyn std::error::Error + Send + Sync>),
    /// No latency was recorded yet.
    #[error("Histogram is empty")]
    Empty,
}

/// Traffic counters of a connection.
///
/// Pass the same `Arc<ConnectionMetrics>` to several connections through
/// [`ConnectionConfig::metrics`](crate::network::ConnectionConfig::metrics)
/// to aggregate them.
pub struct ConnectionMetrics {
    requests_num: AtomicU64,
    errors_num: AtomicU64,
    timeouts_num: AtomicU64,
    orphaned_num: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    latency_ms: AtomicHistogram,
}

impl ConnectionMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        ConnectionMetrics::default()
    }

    /// Counts a request frame written to the socket.
    pub(crate) fn inc_requests(&self, bytes: usize) {
        self.requests_num.fetch_add(1, ORDER_TYPE);
        self.bytes_sent.fetch_add(bytes as u64, ORDER_TYPE);
    }

    pub(crate) fn add_bytes_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, ORDER_TYPE);
    }

    /// Counts a request that ended with an error, timeouts included.
    pub(crate) fn inc_errors(&self) {
        self.errors_num.fetch_add(1, ORDER_TYPE);
    }

    pub(crate) fn inc_timeouts(&self) {
        self.timeouts_num.fetch_add(1, ORDER_TYPE);
    }

    pub(crate) fn inc_orphaned(&self) {
        self.orphaned_num.fetch_add(1, ORDER_TYPE);
    }

    /// Records the time, in milliseconds, from issuing a request to its
    /// response.
    pub(crate) fn log_request_latency(&self, latency_ms: u64) -> Result<(), MetricsError> {
        self.latency_ms
            .increment(latency_ms)
            .map_err(|err| MetricsError::HistogramError(Arc::new(err)))
    }

    /// Returns the average request latency in milliseconds.
    pub fn get_latency_avg_ms(&self) -> Result<u64, MetricsError> {
        Self::mean(&self.latency_ms.load())
    }

    /// Returns the request latency in milliseconds at `percentile`
    /// (0.0 - 100.0), as the upper edge of the bucket it falls into.
    pub fn get_latency_percentile_ms(&self, percentile: f64) -> Result<u64, MetricsError> {
        match self.latency_ms.load().percentile(percentile) {
            Err(err) => Err(MetricsError::HistogramError(Arc::new(err))),
            Ok(None) => Err(MetricsError::Empty),
            Ok(Some(bucket)) => Ok(bucket.end()),
        }
    }

    /// Returns the number of request frames written, keepalives included.
    pub fn get_requests_num(&self) -> u64 {
        self.requests_num.load(ORDER_TYPE)
    }

    /// Returns the number of requests that failed.
    pub fn get_errors_num(&self) -> u64 {
        self.errors_num.load(ORDER_TYPE)
    }

    /// Returns the number of requests that timed out.
    pub fn get_timeouts_num(&self) -> u64 {
        self.timeouts_num.load(ORDER_TYPE)
    }

    /// Returns the number of stream ids abandoned by their requests.
    pub fn get_orphaned_num(&self) -> u64 {
        self.orphaned_num.load(ORDER_TYPE)
    }

    /// Returns the number of bytes written, frame headers included.
    pub fn get_bytes_sent(&self) -> u64 {
        self.bytes_sent.load(ORDER_TYPE)
    }

    /// Returns the number of bytes read, frame headers included.
    pub fn get_bytes_received(&self) -> u64 {
        self.bytes_received.load(ORDER_TYPE)
    }

    // Buckets count as the middle of their range.
    fn mean(h: &Histogram) -> Result<u64, MetricsError> {
        let mut weighted_sum = 0_u128;
        let mut count = 0_u128;

        for bucket in h {
            let mid = ((bucket.start() + bucket.end()) / 2) as u128;
            weighted_sum += mid * bucket.count() as u128;
            count += bucket.count() as u128;
        }

        if count != 0 {
            Ok((weighted_sum / count) as u64)
        } else {
            Err(MetricsError::Empty)
        }
    }
}

impl Default for ConnectionMetrics {
    fn default() -> Self {
        // Exact up to 8191 ms, relative error 0.000244 above, values up to 65535 ms.
        let max_value_power = 16;
        let grouping_power = 12;

        ConnectionMetrics {
            requests_num: AtomicU64::new(0),
            errors_num: AtomicU64::new(0),
            timeouts_num: AtomicU64::new(0),
            orphaned_num: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            latency_ms: AtomicHistogram::new(grouping_power, max_value_power)
                .expect("grouping power is below max value power"),
        }
    }
}

impl std::fmt::Debug for ConnectionMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMetrics")
            .field("requests_num", &self.requests_num)
            .field("errors_num", &self.errors_num)
            .field("timeouts_num", &self.timeouts_num)
            .field("orphaned_num", &self.orphaned_num)
            .field("bytes_sent", &self.bytes_sent)
            .field("bytes_received", &self.bytes_received)
            .field("latency_avg_ms", &self.get_latency_avg_ms().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionMetrics, MetricsError};
    use assert_matches::assert_matches;

    #[test]
    fn counters_accumulate() {
        let metrics = ConnectionMetrics::new();
        metrics.inc_requests(20);
        metrics.inc_requests(30);
        metrics.add_bytes_received(9);
        metrics.inc_errors();
        metrics.inc_timeouts();

        assert_eq!(metrics.get_requests_num(), 2);
        assert_eq!(metrics.get_bytes_sent(), 50);
        assert_eq!(metrics.get_bytes_received(), 9);
        assert_eq!(metrics.get_errors_num(), 1);
        assert_eq!(metrics.get_timeouts_num(), 1);
        assert_eq!(metrics.get_orphaned_num(), 0);
    }

    #[test]
    fn latency_average_and_percentiles() {
        let metrics = ConnectionMetrics::new();
        assert_matches!(metrics.get_latency_avg_ms(), Err(MetricsError::Empty));
        assert_matches!(metrics.get_latency_percentile_ms(50.0), Err(MetricsError::Empty));

        for latency in [10, 20, 30, 40] {
            metrics.log_request_latency(latency).unwrap();
        }
        assert_eq!(metrics.get_latency_avg_ms().unwrap(), 25);
        assert_eq!(metrics.get_latency_percentile_ms(100.0).unwrap(), 40);
        assert!(metrics.log_request_latency(1 << 20).is_err());
    }
}
