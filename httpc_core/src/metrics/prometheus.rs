use super::{AttemptLabels, DURATION_BUCKETS, MetricsProvider, SIZE_BUCKETS};
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

const ATTEMPT_LABELS: [&str; 7] = [
    "client_name",
    "method",
    "host",
    "status",
    "attempt",
    "retry",
    "error",
];
const BASE_LABELS: [&str; 3] = ["client_name", "method", "host"];
const RETRY_LABELS: [&str; 4] = ["client_name", "method", "host", "reason"];

/// Prometheus backend. Instruments register against the supplied registry
/// (or an owned one); scrape output is available via [`PrometheusMetrics::export`].
pub struct PrometheusMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
    retries_total: IntCounterVec,
    inflight: IntGaugeVec,
    request_size: HistogramVec,
    response_size: HistogramVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Total number of request attempts"),
            &ATTEMPT_LABELS,
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "Attempt latency in seconds")
                .buckets(DURATION_BUCKETS.to_vec()),
            &ATTEMPT_LABELS,
        )?;
        let retries_total = IntCounterVec::new(
            Opts::new("retries_total", "Total number of retries by reason"),
            &RETRY_LABELS,
        )?;
        let inflight = IntGaugeVec::new(
            Opts::new("inflight_requests", "Requests currently in flight"),
            &BASE_LABELS,
        )?;
        let request_size = HistogramVec::new(
            HistogramOpts::new("request_size_bytes", "Request body size in bytes")
                .buckets(SIZE_BUCKETS.to_vec()),
            &BASE_LABELS,
        )?;
        let response_size = HistogramVec::new(
            HistogramOpts::new("response_size_bytes", "Response body size in bytes")
                .buckets(SIZE_BUCKETS.to_vec()),
            &BASE_LABELS,
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(retries_total.clone()))?;
        registry.register(Box::new(inflight.clone()))?;
        registry.register(Box::new(request_size.clone()))?;
        registry.register(Box::new(response_size.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
            retries_total,
            inflight,
            request_size,
            response_size,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn export(&self) -> String {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrometheusMetrics")
    }
}

impl MetricsProvider for PrometheusMetrics {
    fn record_request(&self, labels: &AttemptLabels<'_>) {
        self.requests_total
            .with_label_values(&[
                labels.client,
                labels.method,
                labels.host,
                &labels.status_str(),
                &labels.attempt.to_string(),
                bool_label(labels.retry),
                bool_label(labels.error),
            ])
            .inc();
    }

    fn record_duration(&self, labels: &AttemptLabels<'_>, seconds: f64) {
        self.request_duration
            .with_label_values(&[
                labels.client,
                labels.method,
                labels.host,
                &labels.status_str(),
                &labels.attempt.to_string(),
                bool_label(labels.retry),
                bool_label(labels.error),
            ])
            .observe(seconds);
    }

    fn record_retry(&self, client: &str, method: &str, host: &str, reason: &str) {
        self.retries_total
            .with_label_values(&[client, method, host, reason])
            .inc();
    }

    fn record_inflight(&self, client: &str, method: &str, host: &str, delta: i64) {
        self.inflight
            .with_label_values(&[client, method, host])
            .add(delta);
    }

    fn record_request_size(&self, client: &str, method: &str, host: &str, bytes: u64) {
        self.request_size
            .with_label_values(&[client, method, host])
            .observe(bytes as f64);
    }

    fn record_response_size(&self, client: &str, method: &str, host: &str, bytes: u64) {
        self.response_size
            .with_label_values(&[client, method, host])
            .observe(bytes as f64);
    }
}

fn bool_label(v: bool) -> &'static str {
    if v { "true" } else { "false" }
}
