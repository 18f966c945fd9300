use super::{AttemptLabels, DURATION_BUCKETS, MetricsProvider, SIZE_BUCKETS};
use opentelemetry::metrics::{Counter, Histogram, UpDownCounter};
use opentelemetry::{KeyValue, global};

/// OpenTelemetry backend recording through the globally installed meter
/// provider. Without an installed provider every instrument is a no-op, so
/// construction is always safe.
pub struct OtelMetrics {
    requests_total: Counter<u64>,
    request_duration: Histogram<f64>,
    retries_total: Counter<u64>,
    inflight: UpDownCounter<i64>,
    request_size: Histogram<u64>,
    response_size: Histogram<u64>,
}

impl OtelMetrics {
    pub fn new() -> Self {
        let meter = global::meter("httpc_core");
        Self {
            requests_total: meter.u64_counter("requests_total").build(),
            request_duration: meter
                .f64_histogram("request_duration_seconds")
                .with_boundaries(DURATION_BUCKETS.to_vec())
                .build(),
            retries_total: meter.u64_counter("retries_total").build(),
            inflight: meter.i64_up_down_counter("inflight_requests").build(),
            request_size: meter
                .u64_histogram("request_size_bytes")
                .with_boundaries(SIZE_BUCKETS.to_vec())
                .build(),
            response_size: meter
                .u64_histogram("response_size_bytes")
                .with_boundaries(SIZE_BUCKETS.to_vec())
                .build(),
        }
    }

    fn attempt_attrs(labels: &AttemptLabels<'_>) -> Vec<KeyValue> {
        vec![
            KeyValue::new("client_name", labels.client.to_string()),
            KeyValue::new("method", labels.method.to_string()),
            KeyValue::new("host", labels.host.to_string()),
            KeyValue::new("status", labels.status_str()),
            KeyValue::new("attempt", i64::from(labels.attempt)),
            KeyValue::new("retry", labels.retry),
            KeyValue::new("error", labels.error),
        ]
    }

    fn base_attrs(client: &str, method: &str, host: &str) -> Vec<KeyValue> {
        vec![
            KeyValue::new("client_name", client.to_string()),
            KeyValue::new("method", method.to_string()),
            KeyValue::new("host", host.to_string()),
        ]
    }
}

impl Default for OtelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OtelMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OtelMetrics")
    }
}

impl MetricsProvider for OtelMetrics {
    fn record_request(&self, labels: &AttemptLabels<'_>) {
        self.requests_total.add(1, &Self::attempt_attrs(labels));
    }

    fn record_duration(&self, labels: &AttemptLabels<'_>, seconds: f64) {
        self.request_duration
            .record(seconds, &Self::attempt_attrs(labels));
    }

    fn record_retry(&self, client: &str, method: &str, host: &str, reason: &str) {
        let mut attrs = Self::base_attrs(client, method, host);
        attrs.push(KeyValue::new("reason", reason.to_string()));
        self.retries_total.add(1, &attrs);
    }

    fn record_inflight(&self, client: &str, method: &str, host: &str, delta: i64) {
        self.inflight.add(delta, &Self::base_attrs(client, method, host));
    }

    fn record_request_size(&self, client: &str, method: &str, host: &str, bytes: u64) {
        self.request_size
            .record(bytes, &Self::base_attrs(client, method, host));
    }

    fn record_response_size(&self, client: &str, method: &str, host: &str, bytes: u64) {
        self.response_size
            .record(bytes, &Self::base_attrs(client, method, host));
    }
}
