use reqwest::{Method, StatusCode};
use std::time::Duration;

/// Retry schedule and eligibility rules. Cloning is cheap; call sites
/// snapshot the policy once at client construction.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts for one invocation. Normalization clamps
    /// this to at least 1.
    pub max_attempts: u32,
    /// First backoff delay; doubles each attempt.
    pub base_delay: Duration,
    /// Upper bound for any computed delay.
    pub max_delay: Duration,
    /// Symmetric jitter fraction in [0, 1].
    pub jitter: f64,
    /// Methods retried unconditionally.
    pub retry_methods: Vec<Method>,
    /// Response statuses that trigger a retry.
    pub retry_status_codes: Vec<StatusCode>,
    /// Honor a server-supplied `Retry-After` over the exponential schedule.
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter: 0.2,
            retry_methods: vec![
                Method::GET,
                Method::HEAD,
                Method::OPTIONS,
                Method::PUT,
                Method::DELETE,
            ],
            retry_status_codes: vec![
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::BAD_GATEWAY,
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::GATEWAY_TIMEOUT,
            ],
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retry_status_codes.contains(&status)
    }

    pub fn is_retryable_method(&self, method: &Method) -> bool {
        self.retry_methods.contains(method)
    }

    /// Clamp fields into their documented ranges. Pure; applied once at
    /// client construction.
    pub(crate) fn normalized(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        self.jitter = self.jitter.clamp(0.0, 1.0);
        if self.max_delay < self.base_delay {
            self.max_delay = self.base_delay;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.base_delay, Duration::from_millis(100));
        assert_eq!(p.max_delay, Duration::from_secs(2));
        assert!((p.jitter - 0.2).abs() < f64::EPSILON);
        assert!(p.respect_retry_after);
        assert!(p.is_retryable_method(&Method::GET));
        assert!(p.is_retryable_method(&Method::DELETE));
        assert!(!p.is_retryable_method(&Method::POST));
        assert!(p.is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!p.is_retryable_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn normalization_clamps_out_of_range_fields() {
        let p = RetryPolicy {
            max_attempts: 0,
            jitter: 7.5,
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(1),
            ..RetryPolicy::default()
        }
        .normalized();
        assert_eq!(p.max_attempts, 1);
        assert!((p.jitter - 1.0).abs() < f64::EPSILON);
        assert_eq!(p.max_delay, Duration::from_secs(3));
    }
}
