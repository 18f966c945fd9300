pub mod retry;

use crate::http::breaker::CircuitBreaker;
use crate::metrics::MetricsProvider;
use self::retry::RetryPolicy;
use snafu::{Location, Snafu};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("rate limiter rate {rate} is not positive"))]
    InvalidRate {
        rate: f64,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("rate limiter burst {burst} is not positive"))]
    InvalidBurst {
        burst: f64,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("{field} must be positive"))]
    InvalidTimeout {
        field: &'static str,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to register metrics"))]
    MetricsInit {
        source: ::prometheus::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to build the HTTP transport"))]
    TransportInit {
        source: reqwest::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Which metrics backend the client records through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricsBackend {
    #[default]
    Otel,
    Prometheus,
    Noop,
}

/// Token-bucket parameters. `burst` defaults to `rate` (one second of
/// tokens) when left unset.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub rate: f64,
    pub burst: Option<f64>,
}

impl RateLimiterConfig {
    pub fn per_second(rate: f64) -> Self {
        Self { rate, burst: None }
    }

    pub(crate) fn effective_burst(&self) -> f64 {
        self.burst.unwrap_or(self.rate)
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            rate: 10.0,
            burst: None,
        }
    }
}

/// Flat record of every pipeline option. Defaulting and range clamping are
/// applied once, by [`ClientConfig::normalized`], at client construction.
#[derive(Clone)]
pub struct ClientConfig {
    /// Label value for every metric this client emits.
    pub client_name: String,
    /// Overall budget for one invocation, across attempts and backoff.
    pub timeout: Duration,
    /// Budget for a single attempt.
    pub per_try_timeout: Duration,
    pub retry_enabled: bool,
    pub retry_policy: RetryPolicy,
    pub circuit_breaker_enabled: bool,
    /// Breaker instance to share across clients. A default one is created
    /// when enabled and unset.
    pub circuit_breaker: Option<Arc<CircuitBreaker>>,
    pub rate_limiter_enabled: bool,
    pub rate_limiter: Option<RateLimiterConfig>,
    pub metrics_enabled: bool,
    pub metrics_backend: MetricsBackend,
    /// Custom sink overriding `metrics_backend`.
    pub metrics_provider: Option<Arc<dyn MetricsProvider>>,
    /// Cap on response body bytes read through the pipeline.
    pub max_response_bytes: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: "httpc".to_string(),
            timeout: Duration::from_secs(5),
            per_try_timeout: Duration::from_secs(2),
            retry_enabled: true,
            retry_policy: RetryPolicy::default(),
            circuit_breaker_enabled: false,
            circuit_breaker: None,
            rate_limiter_enabled: false,
            rate_limiter: None,
            metrics_enabled: true,
            metrics_backend: MetricsBackend::default(),
            metrics_provider: None,
            max_response_bytes: None,
        }
    }
}

impl ClientConfig {
    /// Validate and normalize. Pure apart from the returned value; run once
    /// at construction so the pipeline never re-checks.
    pub(crate) fn normalized(mut self) -> Result<Self, ConfigError> {
        if self.timeout.is_zero() {
            return InvalidTimeoutSnafu { field: "timeout" }.fail();
        }
        if self.per_try_timeout.is_zero() {
            return InvalidTimeoutSnafu {
                field: "per_try_timeout",
            }
            .fail();
        }
        self.retry_policy = self.retry_policy.normalized();
        if self.rate_limiter_enabled {
            let rl = self.rate_limiter.unwrap_or_default();
            if !(rl.rate > 0.0) {
                return InvalidRateSnafu { rate: rl.rate }.fail();
            }
            if !(rl.effective_burst() > 0.0) {
                return InvalidBurstSnafu {
                    burst: rl.effective_burst(),
                }
                .fail();
            }
            self.rate_limiter = Some(rl);
        }
        Ok(self)
    }

    /// Attempts the pipeline will actually make: 1 when retry is disabled.
    pub(crate) fn effective_max_attempts(&self) -> u32 {
        if self.retry_enabled {
            self.retry_policy.max_attempts.max(1)
        } else {
            1
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_name", &self.client_name)
            .field("timeout", &self.timeout)
            .field("per_try_timeout", &self.per_try_timeout)
            .field("retry_enabled", &self.retry_enabled)
            .field("retry_policy", &self.retry_policy)
            .field("circuit_breaker_enabled", &self.circuit_breaker_enabled)
            .field("rate_limiter_enabled", &self.rate_limiter_enabled)
            .field("rate_limiter", &self.rate_limiter)
            .field("metrics_enabled", &self.metrics_enabled)
            .field("metrics_backend", &self.metrics_backend)
            .field("max_response_bytes", &self.max_response_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = ClientConfig::default();
        assert_eq!(c.timeout, Duration::from_secs(5));
        assert_eq!(c.per_try_timeout, Duration::from_secs(2));
        assert!(c.retry_enabled);
        assert!(!c.circuit_breaker_enabled);
        assert!(!c.rate_limiter_enabled);
        assert!(c.metrics_enabled);
        assert_eq!(c.metrics_backend, MetricsBackend::Otel);
    }

    #[test]
    fn normalization_fills_limiter_defaults() {
        let c = ClientConfig {
            rate_limiter_enabled: true,
            ..ClientConfig::default()
        }
        .normalized()
        .unwrap();
        let rl = c.rate_limiter.unwrap();
        assert!((rl.rate - 10.0).abs() < f64::EPSILON);
        assert!((rl.effective_burst() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn normalization_rejects_bad_limiter_parameters() {
        let c = ClientConfig {
            rate_limiter_enabled: true,
            rate_limiter: Some(RateLimiterConfig {
                rate: 0.0,
                burst: None,
            }),
            ..ClientConfig::default()
        };
        assert!(matches!(
            c.normalized(),
            Err(ConfigError::InvalidRate { .. })
        ));
    }

    #[test]
    fn normalization_rejects_zero_timeouts() {
        let c = ClientConfig {
            timeout: Duration::ZERO,
            ..ClientConfig::default()
        };
        assert!(matches!(
            c.normalized(),
            Err(ConfigError::InvalidTimeout { .. })
        ));
    }

    #[test]
    fn effective_attempts_is_one_when_retry_disabled() {
        let c = ClientConfig {
            retry_enabled: false,
            ..ClientConfig::default()
        };
        assert_eq!(c.effective_max_attempts(), 1);
    }
}
