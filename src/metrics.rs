//! Metrics sink.
//!
//! One always-present handle, injected at construction. The default is
//! a no-op, so handlers never have to check for a sink.

use std::time::Duration;

pub trait MetricsSink: Send + Sync {
    fn request_started(&self, method: &str);
    fn request_finished(&self, method: &str, status: u16, elapsed: Duration);
}

pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn request_started(&self, _method: &str) {}
    fn request_finished(&self, _method: &str, _status: u16, _elapsed: Duration) {}
}
