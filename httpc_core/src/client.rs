use crate::config::{ClientConfig, ConfigError, MetricsBackend, MetricsInitSnafu, TransportInitSnafu};
use crate::context::RequestContext;
use crate::http::breaker::{BreakerConfig, CircuitBreaker};
use crate::http::error::HttpError;
use crate::http::limiter::RateLimiter;
use crate::http::pipeline::Pipeline;
use crate::metrics::{MetricsProvider, NoopMetrics, OtelMetrics, PrometheusMetrics};
use crate::request::Request;
use crate::response::Response;
use crate::transport::{ReqwestTransport, Transport};
use bytes::Bytes;
use reqwest::Method;
use snafu::ResultExt;
use std::sync::Arc;

/// Reliability-oriented HTTP client: a retrying, breaker- and limiter-gated
/// pipeline around a pluggable transport, with metrics and tracing on every
/// attempt.
///
/// Cloning shares the transport, breaker, limiter and metrics sinks; the
/// pipeline is fully reentrant across concurrent invocations.
#[derive(Clone)]
pub struct Client {
    pipeline: Arc<Pipeline>,
}

impl Client {
    /// Build a client over the default reqwest transport.
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        let transport = ReqwestTransport::new().context(TransportInitSnafu)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Build a client over a caller-supplied transport.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        let config = config.normalized()?;

        let breaker = if config.circuit_breaker_enabled {
            Some(
                config
                    .circuit_breaker
                    .clone()
                    .unwrap_or_else(|| Arc::new(CircuitBreaker::new(BreakerConfig::default()))),
            )
        } else {
            None
        };

        let limiter = match (config.rate_limiter_enabled, config.rate_limiter) {
            (true, Some(rl)) => Some(Arc::new(RateLimiter::new(rl.rate, rl.effective_burst())?)),
            _ => None,
        };

        let metrics: Arc<dyn MetricsProvider> = if !config.metrics_enabled {
            Arc::new(NoopMetrics)
        } else if let Some(custom) = config.metrics_provider.clone() {
            custom
        } else {
            match config.metrics_backend {
                MetricsBackend::Otel => Arc::new(OtelMetrics::new()),
                MetricsBackend::Prometheus => {
                    Arc::new(PrometheusMetrics::new().context(MetricsInitSnafu)?)
                }
                MetricsBackend::Noop => Arc::new(NoopMetrics),
            }
        };

        Ok(Self {
            pipeline: Arc::new(Pipeline {
                config,
                transport,
                breaker,
                limiter,
                metrics,
            }),
        })
    }

    /// Run one request through the full pipeline. The returned response's
    /// body must be consumed or dropped to release per-attempt resources.
    pub async fn execute(
        &self,
        ctx: &RequestContext,
        req: Request,
    ) -> Result<Response, HttpError> {
        self.pipeline.execute(ctx, req).await
    }

    pub async fn get(&self, ctx: &RequestContext, url: &str) -> Result<Response, HttpError> {
        self.execute(ctx, Request::new(Method::GET, url)?).await
    }

    pub async fn head(&self, ctx: &RequestContext, url: &str) -> Result<Response, HttpError> {
        self.execute(ctx, Request::new(Method::HEAD, url)?).await
    }

    pub async fn delete(&self, ctx: &RequestContext, url: &str) -> Result<Response, HttpError> {
        self.execute(ctx, Request::new(Method::DELETE, url)?).await
    }

    pub async fn post(
        &self,
        ctx: &RequestContext,
        url: &str,
        body: impl Into<Bytes>,
    ) -> Result<Response, HttpError> {
        self.execute(ctx, Request::new(Method::POST, url)?.body_bytes(body.into()))
            .await
    }

    pub async fn put(
        &self,
        ctx: &RequestContext,
        url: &str,
        body: impl Into<Bytes>,
    ) -> Result<Response, HttpError> {
        self.execute(ctx, Request::new(Method::PUT, url)?.body_bytes(body.into()))
            .await
    }

    /// GET and decode a JSON body. Non-2xx statuses surface as
    /// [`HttpError::HttpStatus`].
    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        ctx: &RequestContext,
        url: &str,
    ) -> Result<T, HttpError> {
        self.get(ctx, url).await?.error_for_status()?.json().await
    }

    /// POST a JSON payload and decode the JSON response.
    pub async fn post_json<B, T>(
        &self,
        ctx: &RequestContext,
        url: &str,
        body: &B,
    ) -> Result<T, HttpError>
    where
        B: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        let payload =
            serde_json::to_vec(body).context(crate::http::error::EncodeSnafu)?;
        let req = Request::new(Method::POST, url)?
            .header(
                reqwest::header::CONTENT_TYPE,
                reqwest::header::HeaderValue::from_static("application/json"),
            )
            .body_bytes(payload);
        self.execute(ctx, req).await?.error_for_status()?.json().await
    }

    /// The shared breaker, when one is enabled.
    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.pipeline.breaker.as_ref()
    }

    /// The shared rate limiter, when one is enabled.
    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.pipeline.limiter.as_ref()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.pipeline.config)
            .finish()
    }
}
