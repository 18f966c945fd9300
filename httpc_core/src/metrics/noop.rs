use super::{AttemptLabels, MetricsProvider};

/// Discards every sample. Used when metrics are disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsProvider for NoopMetrics {
    fn record_request(&self, _labels: &AttemptLabels<'_>) {}

    fn record_duration(&self, _labels: &AttemptLabels<'_>, _seconds: f64) {}

    fn record_retry(&self, _client: &str, _method: &str, _host: &str, _reason: &str) {}

    fn record_inflight(&self, _client: &str, _method: &str, _host: &str, _delta: i64) {}

    fn record_request_size(&self, _client: &str, _method: &str, _host: &str, _bytes: u64) {}

    fn record_response_size(&self, _client: &str, _method: &str, _host: &str, _bytes: u64) {}
}
