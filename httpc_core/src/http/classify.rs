use crate::http::error::HttpError;
use reqwest::Method;
use std::time::Duration;

/// Broad class of a transport failure, driving the retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection-level failure. `pre_connect` marks errors raised before
    /// any request bytes were written, which are safe to retry regardless of
    /// method.
    Network { pre_connect: bool },
    Timeout,
    Other,
}

const NETWORK_MARKERS: [(&str, bool); 6] = [
    ("connection reset", false),
    ("broken pipe", false),
    ("connection refused", true),
    ("no such host", true),
    ("network is unreachable", true),
    ("connection timed out", true),
];

const TIMEOUT_MARKERS: [&str; 4] = [
    "timeout",
    "deadline exceeded",
    "context deadline exceeded",
    "request timeout",
];

/// Walk the source chain and collect a lowercased rendering of every layer,
/// so wrapped errors classify the same as their cause.
pub(crate) fn error_chain_string(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string().to_lowercase();
    let mut cause = err.source();
    while let Some(c) = cause {
        out.push_str(": ");
        out.push_str(&c.to_string().to_lowercase());
        cause = c.source();
    }
    out
}

/// Classify a pipeline error as network, timeout or other.
pub fn classify(err: &HttpError) -> ErrorClass {
    match err {
        HttpError::Timeout { .. } => ErrorClass::Timeout,
        HttpError::Transport { source, .. } => {
            if source.is_timeout() {
                return ErrorClass::Timeout;
            }
            if source.is_connect() {
                return ErrorClass::Network { pre_connect: true };
            }
            classify_text(&error_chain_string(source))
        }
        HttpError::Io { source, .. } => match source.kind() {
            std::io::ErrorKind::TimedOut => ErrorClass::Timeout,
            std::io::ErrorKind::ConnectionRefused => ErrorClass::Network { pre_connect: true },
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe => {
                ErrorClass::Network { pre_connect: false }
            }
            _ => classify_text(&error_chain_string(source)),
        },
        _ => ErrorClass::Other,
    }
}

fn classify_text(text: &str) -> ErrorClass {
    for (marker, pre_connect) in NETWORK_MARKERS {
        if text.contains(marker) {
            return ErrorClass::Network { pre_connect };
        }
    }
    if TIMEOUT_MARKERS.iter().any(|m| text.contains(m)) {
        return ErrorClass::Timeout;
    }
    ErrorClass::Other
}

/// Which budget a timeout hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    PerTry,
    Overall,
    Context,
    Network,
    Unknown,
}

impl TimeoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutKind::PerTry => "per-try",
            TimeoutKind::Overall => "overall",
            TimeoutKind::Context => "context",
            TimeoutKind::Network => "network",
            TimeoutKind::Unknown => "unknown",
        }
    }
}

const PER_TRY_WINDOW: Duration = Duration::from_millis(100);
const OVERALL_WINDOW: Duration = Duration::from_millis(500);

fn within(elapsed: Duration, budget: Duration, window: Duration) -> bool {
    let lo = budget.saturating_sub(window);
    let hi = budget.saturating_add(window);
    elapsed >= lo && elapsed <= hi
}

/// Tag a raw timeout with the budget it most plausibly exhausted. Attempt
/// elapsed time is matched against the per-try budget, total elapsed time
/// against the overall budget; the raw error text breaks the remaining ties.
pub(crate) fn timeout_kind(
    attempt_elapsed: Duration,
    total_elapsed: Duration,
    per_try: Duration,
    overall: Duration,
    raw: &str,
) -> TimeoutKind {
    if within(attempt_elapsed, per_try, PER_TRY_WINDOW) {
        TimeoutKind::PerTry
    } else if within(total_elapsed, overall, OVERALL_WINDOW) {
        TimeoutKind::Overall
    } else if raw.contains("context deadline exceeded") {
        TimeoutKind::Context
    } else if raw.contains("timeout") {
        TimeoutKind::Network
    } else {
        TimeoutKind::Unknown
    }
}

/// Structured diagnostics for a timed-out invocation. Carried by
/// [`HttpError::Timeout`]; `Display` renders the full remediation text.
#[derive(Debug)]
pub struct TimeoutDetails {
    pub method: Method,
    pub url: String,
    pub host: String,
    pub overall_timeout: Duration,
    pub per_try_timeout: Duration,
    pub elapsed: Duration,
    pub attempt: u32,
    pub max_attempts: u32,
    pub retry_enabled: bool,
    pub kind: TimeoutKind,
    /// The raw error the enrichment wrapped.
    pub source: Option<Box<HttpError>>,
}

impl TimeoutDetails {
    pub fn remediation(&self) -> &'static str {
        match self.kind {
            TimeoutKind::PerTry => {
                "the per-attempt budget expired; raise per_try_timeout or reduce backoff so attempts fit the overall window"
            }
            TimeoutKind::Overall => {
                "the overall budget expired across attempts; raise timeout or lower max_attempts and backoff delays"
            }
            TimeoutKind::Context => {
                "the caller's deadline expired before the request completed; widen the caller budget or reduce upstream work"
            }
            TimeoutKind::Network => {
                "the connection stalled before a response arrived; check reachability of the host and intermediate proxies"
            }
            TimeoutKind::Unknown => {
                "the request timed out for an undetermined reason; inspect the wrapped source error"
            }
        }
    }
}

impl std::fmt::Display for TimeoutDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} timed out ({}) after {:?} on attempt {}/{} (per-try budget {:?}, overall {:?}, retries {}): {}",
            self.method,
            self.url,
            self.kind.as_str(),
            self.elapsed,
            self.attempt,
            self.max_attempts,
            self.per_try_timeout,
            self.overall_timeout,
            if self.retry_enabled { "enabled" } else { "disabled" },
            self.remediation(),
        )?;
        if let Some(source) = &self.source {
            write!(f, " (caused by: {source})")?;
        }
        Ok(())
    }
}
