pub mod client;
pub mod config;
pub mod context;
pub mod http;
pub mod metrics;
pub mod request;
pub mod response;
pub mod transport;

pub use client::Client;
pub use config::retry::RetryPolicy;
pub use config::{ClientConfig, ConfigError, MetricsBackend, RateLimiterConfig};
pub use context::RequestContext;
pub use http::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use http::classify::{ErrorClass, TimeoutDetails, TimeoutKind, classify};
pub use http::error::HttpError;
pub use http::limiter::RateLimiter;
pub use metrics::{AttemptLabels, MetricsProvider};
pub use request::{IDEMPOTENCY_KEY, Request, RequestBody};
pub use response::{Response, ResponseBody};
pub use transport::{ReqwestTransport, Transport};
