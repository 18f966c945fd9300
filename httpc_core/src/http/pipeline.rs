use crate::config::ClientConfig;
use crate::config::retry::RetryPolicy;
use crate::context::RequestContext;
use crate::http::backoff;
use crate::http::breaker::CircuitBreaker;
use crate::http::classify::{self, ErrorClass, TimeoutDetails};
use crate::http::error::{CancelledSnafu, HttpError, MaxAttemptsSnafu, TimeoutSnafu};
use crate::http::limiter::RateLimiter;
use crate::metrics::{AttemptLabels, InflightGuard, MetricsProvider};
use crate::request::Request;
use crate::response::{AttemptGuard, Response};
use crate::transport::Transport;
use bytes::Bytes;
use reqwest::Method;
use snafu::IntoError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{Instrument, Span, debug, field, info_span};

/// The composed request-execution pipeline: deadline enforcement, metrics
/// and tracing at the entry; retry iteration around the attempt executor;
/// breaker and limiter gating the transport inside each attempt.
pub(crate) struct Pipeline {
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) breaker: Option<Arc<CircuitBreaker>>,
    pub(crate) limiter: Option<Arc<RateLimiter>>,
    pub(crate) metrics: Arc<dyn MetricsProvider>,
}

impl Pipeline {
    pub(crate) async fn execute(
        &self,
        caller_ctx: &RequestContext,
        mut req: Request,
    ) -> Result<Response, HttpError> {
        let invocation_start = Instant::now();
        let host = req.url().host_str().unwrap_or_default().to_string();
        let method = req.method().clone();
        let ctx = caller_ctx.narrowed(self.config.timeout);

        let span_name = format!("HTTP {method}");
        let span = info_span!(
            "http_request",
            otel.name = %span_name,
            http.method = %method,
            http.url = %req.url(),
            http.host = %host,
            http.status_code = field::Empty,
            http.attempt = field::Empty,
            http.retry = field::Empty,
            http.error = field::Empty,
            http.duration_seconds = field::Empty,
        );

        let _inflight = InflightGuard::new(
            self.metrics.clone(),
            &self.config.client_name,
            method.as_str(),
            &host,
        );

        async {
            // One replayable copy of the body, taken before the first
            // attempt. Buffering failures surface without touching the
            // transport.
            let original: Option<Bytes> = if self.config.retry_enabled && !req.body().is_empty() {
                Some(req.buffer_body().await?)
            } else {
                None
            };
            let request_size = original
                .as_ref()
                .map(|b| b.len() as u64)
                .or_else(|| req.content_length())
                .unwrap_or(0);
            self.metrics.record_request_size(
                &self.config.client_name,
                method.as_str(),
                &host,
                request_size,
            );

            self.run_attempts(&ctx, req, original, &host, invocation_start)
                .await
        }
        .instrument(span)
        .await
    }

    async fn run_attempts(
        &self,
        ctx: &RequestContext,
        mut req: Request,
        original: Option<Bytes>,
        host: &str,
        invocation_start: Instant,
    ) -> Result<Response, HttpError> {
        let max_attempts = self.config.effective_max_attempts();
        let mut last_status = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if attempt > 1
                && let Some(buf) = &original
            {
                req.restore_body(buf.clone());
            }

            let per_try_deadline = Instant::now() + self.config.per_try_timeout;
            let attempt_deadline = ctx
                .deadline()
                .map_or(per_try_deadline, |d| d.min(per_try_deadline));
            let attempt_token = ctx.child_token();
            let attempt_start = Instant::now();

            let raw = tokio::select! {
                r = self.call_inner(ctx, &mut req) => r,
                _ = ctx.cancelled() => CancelledSnafu.fail(),
                _ = tokio::time::sleep_until(attempt_deadline) => {
                    Err(HttpError::from_io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "deadline exceeded",
                    )))
                }
            };
            let attempt_elapsed = attempt_start.elapsed();
            let total_elapsed = invocation_start.elapsed();

            // Raw timeouts are always enriched before they reach the caller.
            let outcome = match raw {
                Err(e)
                    if !e.is_timeout()
                        && matches!(classify::classify(&e), ErrorClass::Timeout) =>
                {
                    Err(self.enrich_timeout(
                        e,
                        &req,
                        host,
                        attempt,
                        max_attempts,
                        attempt_elapsed,
                        total_elapsed,
                    ))
                }
                other => other,
            };

            // Ownership transfer: a delivered body carries the cancel handle
            // and per-try deadline; failed attempts release them here.
            let outcome = match outcome {
                Ok(mut resp) => {
                    resp.set_body_limit(self.config.max_response_bytes);
                    resp.attach_guard(AttemptGuard::new(attempt_token, Some(attempt_deadline)));
                    Ok(resp)
                }
                Err(e) => {
                    attempt_token.cancel();
                    Err(e)
                }
            };

            if let Ok(resp) = &outcome {
                last_status = Some(resp.status());
            }

            let labels = AttemptLabels {
                client: &self.config.client_name,
                method: req.method().as_str(),
                host,
                status: outcome.as_ref().ok().map(|r| r.status()),
                attempt,
                retry: attempt > 1,
                error: outcome.is_err(),
            };
            self.metrics.record_request(&labels);
            self.metrics
                .record_duration(&labels, attempt_elapsed.as_secs_f64());
            let span = Span::current();
            span.record("http.attempt", u64::from(attempt));
            span.record("http.retry", attempt > 1);
            span.record("http.error", outcome.is_err());
            span.record("http.duration_seconds", attempt_elapsed.as_secs_f64());
            if let Some(status) = labels.status {
                span.record("http.status_code", u64::from(status.as_u16()));
            }

            let decision = decide(
                &self.config.retry_policy,
                self.config.retry_enabled,
                req.method(),
                req.idempotency_key_value().is_some(),
                &outcome,
                attempt,
                max_attempts,
                ctx.deadline_passed(),
            );

            let reason = match decision {
                Decision::Give => return self.finish(outcome, req.method().as_str(), host),
                Decision::Exhausted(_) => {
                    return match outcome {
                        Ok(resp) => self.finish(Ok(resp), req.method().as_str(), host),
                        Err(e) => Err(MaxAttemptsSnafu {
                            attempts: attempt,
                            last_status,
                        }
                        .into_error(e)),
                    };
                }
                Decision::Retry(reason) => reason,
            };

            let delay = backoff::next_delay(
                &self.config.retry_policy,
                attempt,
                outcome.as_ref().ok().map(|r| r.headers()),
            );
            if let Some(remaining) = ctx.remaining()
                && remaining < delay
            {
                // Not enough budget left to sleep and try again.
                return self.finish(outcome, req.method().as_str(), host);
            }

            self.metrics.record_retry(
                &self.config.client_name,
                req.method().as_str(),
                host,
                reason,
            );
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                reason, "retrying after backoff"
            );
            drop(outcome);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancelled() => return CancelledSnafu.fail(),
            }
        }
    }

    /// Breaker gates the call; the limiter gates transport entry inside it.
    async fn call_inner(
        &self,
        ctx: &RequestContext,
        req: &mut Request,
    ) -> Result<Response, HttpError> {
        if let Some(breaker) = &self.breaker {
            breaker.check()?;
            let result = self.through_limiter(ctx, req).await;
            breaker.record(result).await
        } else {
            self.through_limiter(ctx, req).await
        }
    }

    async fn through_limiter(
        &self,
        ctx: &RequestContext,
        req: &mut Request,
    ) -> Result<Response, HttpError> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire(ctx).await?;
        }
        self.transport.execute(ctx, req).await
    }

    fn finish(
        &self,
        outcome: Result<Response, HttpError>,
        method: &str,
        host: &str,
    ) -> Result<Response, HttpError> {
        if let Ok(resp) = &outcome {
            self.metrics.record_response_size(
                &self.config.client_name,
                method,
                host,
                resp.content_length().unwrap_or(0),
            );
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn enrich_timeout(
        &self,
        raw: HttpError,
        req: &Request,
        host: &str,
        attempt: u32,
        max_attempts: u32,
        attempt_elapsed: Duration,
        total_elapsed: Duration,
    ) -> HttpError {
        let raw_text = classify::error_chain_string(&raw);
        let kind = classify::timeout_kind(
            attempt_elapsed,
            total_elapsed,
            self.config.per_try_timeout,
            self.config.timeout,
            &raw_text,
        );
        TimeoutSnafu {
            details: Box::new(TimeoutDetails {
                method: req.method().clone(),
                url: req.url().to_string(),
                host: host.to_string(),
                overall_timeout: self.config.timeout,
                per_try_timeout: self.config.per_try_timeout,
                elapsed: total_elapsed,
                attempt,
                max_attempts,
                retry_enabled: self.config.retry_enabled,
                kind,
                source: Some(Box::new(raw)),
            }),
        }
        .build()
    }
}

enum Decision {
    Retry(&'static str),
    Exhausted(&'static str),
    Give,
}

/// The retry decision for one completed attempt. Returns the classified
/// reason (`net`, `timeout`, `status`) when another attempt should run,
/// `Exhausted` when only the attempt cap blocked it, `Give` otherwise.
#[allow(clippy::too_many_arguments)]
fn decide(
    policy: &RetryPolicy,
    retry_enabled: bool,
    method: &Method,
    has_idempotency_key: bool,
    outcome: &Result<Response, HttpError>,
    attempt: u32,
    max_attempts: u32,
    deadline_passed: bool,
) -> Decision {
    if !retry_enabled {
        return Decision::Give;
    }
    if matches!(outcome, Err(HttpError::CircuitOpen { .. })) {
        return Decision::Give;
    }
    let status_retryable = matches!(outcome, Ok(r) if policy.is_retryable_status(r.status()));
    if !(outcome.is_err() || status_retryable) {
        return Decision::Give;
    }
    // Pre-connect failures never transmitted request bytes, so they are safe
    // to retry regardless of method.
    let pre_connect = matches!(
        outcome,
        Err(e) if matches!(classify::classify(e), ErrorClass::Network { pre_connect: true })
    );
    let qualifies = policy.is_retryable_method(method)
        || ((*method == Method::POST || *method == Method::PATCH) && has_idempotency_key)
        || pre_connect;
    if !qualifies {
        return Decision::Give;
    }
    if deadline_passed {
        return Decision::Give;
    }
    let reason = match outcome {
        Err(e) => match classify::classify(e) {
            ErrorClass::Network { .. } => "net",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Other => return Decision::Give,
        },
        Ok(_) => "status",
    };
    if attempt >= max_attempts {
        return Decision::Exhausted(reason);
    }
    Decision::Retry(reason)
}
