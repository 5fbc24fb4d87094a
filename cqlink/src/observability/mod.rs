//! Counters and request latency of a connection.

pub mod metrics;
