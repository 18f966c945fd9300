use reqwest::StatusCode;
use std::sync::Arc;

pub mod noop;
pub mod otel;
pub mod prometheus;

pub use noop::NoopMetrics;
pub use otel::OtelMetrics;
pub use prometheus::PrometheusMetrics;

/// Labels for one completed attempt.
#[derive(Debug, Clone)]
pub struct AttemptLabels<'a> {
    pub client: &'a str,
    pub method: &'a str,
    pub host: &'a str,
    pub status: Option<StatusCode>,
    pub attempt: u32,
    pub retry: bool,
    pub error: bool,
}

impl AttemptLabels<'_> {
    /// Status label value; empty when no response was observed. Providers
    /// are required to tolerate empty labels.
    pub fn status_str(&self) -> String {
        self.status
            .map(|s| s.as_u16().to_string())
            .unwrap_or_default()
    }
}

/// Backend-neutral metrics sink driven by the pipeline. Implementations must
/// be safe for concurrent recording, tolerate empty label values and
/// negative gauge deltas, and never panic.
pub trait MetricsProvider: Send + Sync {
    /// Counter `requests_total`, one increment per attempt.
    fn record_request(&self, labels: &AttemptLabels<'_>);

    /// Histogram `request_duration_seconds`, one sample per attempt.
    fn record_duration(&self, labels: &AttemptLabels<'_>, seconds: f64);

    /// Counter `retries_total`; `reason` is `net`, `timeout` or `status`.
    fn record_retry(&self, client: &str, method: &str, host: &str, reason: &str);

    /// Up-down gauge `inflight_requests`.
    fn record_inflight(&self, client: &str, method: &str, host: &str, delta: i64);

    /// Histogram `request_size_bytes`, one sample per invocation.
    fn record_request_size(&self, client: &str, method: &str, host: &str, bytes: u64);

    /// Histogram `response_size_bytes`, sampled when a response is returned.
    fn record_response_size(&self, client: &str, method: &str, host: &str, bytes: u64);
}

/// Pairs every in-flight increment with exactly one decrement, on every exit
/// path of a pipeline invocation.
pub(crate) struct InflightGuard {
    provider: Arc<dyn MetricsProvider>,
    client: String,
    method: String,
    host: String,
}

impl InflightGuard {
    pub(crate) fn new(
        provider: Arc<dyn MetricsProvider>,
        client: &str,
        method: &str,
        host: &str,
    ) -> Self {
        provider.record_inflight(client, method, host, 1);
        Self {
            provider,
            client: client.to_string(),
            method: method.to_string(),
            host: host.to_string(),
        }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.provider
            .record_inflight(&self.client, &self.method, &self.host, -1);
    }
}

/// Histogram boundaries shared by the duration instruments: 1 ms to 60 s.
pub(crate) const DURATION_BUCKETS: [f64; 14] = [
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 60.0,
];

/// Size histogram boundaries: 64 B to 16 MiB.
pub(crate) const SIZE_BUCKETS: [f64; 10] = [
    64.0, 256.0, 1024.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0, 4194304.0, 16777216.0,
];
