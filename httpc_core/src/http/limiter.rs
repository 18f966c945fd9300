use crate::config::{ConfigError, InvalidBurstSnafu, InvalidRateSnafu};
use crate::context::RequestContext;
use crate::http::error::{CancelledSnafu, HttpError};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct Bucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    /// Credit tokens for the wall-clock elapsed since the last refill.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Token-bucket rate limiter gating transport entry. One bucket per client,
/// shared across hosts: it bounds global throughput, not per-host.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// `rate` in tokens per second, `capacity` the burst size. The bucket
    /// starts full. Non-positive values are configuration errors.
    pub fn new(rate: f64, capacity: f64) -> Result<Self, ConfigError> {
        if !(rate > 0.0) {
            return InvalidRateSnafu { rate }.fail();
        }
        if !(capacity > 0.0) {
            return InvalidBurstSnafu { burst: capacity }.fail();
        }
        Ok(Self {
            bucket: Mutex::new(Bucket {
                rate,
                capacity,
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take one token without waiting. Refills first.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.lock();
        bucket.refill(Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Estimated wait until one token accrues. The sleep happens outside the
    /// lock; callers re-enter the acquire loop afterwards.
    fn wait_hint(&self) -> Duration {
        let mut bucket = self.lock();
        bucket.refill(Instant::now());
        if bucket.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - bucket.tokens) / bucket.rate)
        }
    }

    /// Block until one token is consumed, the context is cancelled, or its
    /// deadline passes.
    pub async fn acquire(&self, ctx: &RequestContext) -> Result<(), HttpError> {
        loop {
            if self.try_acquire() {
                return Ok(());
            }
            let wait = self.wait_hint();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = ctx.cancelled() => return CancelledSnafu.fail(),
                _ = deadline_sleep(ctx.deadline()) => {
                    return Err(HttpError::from_io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "deadline exceeded while waiting for a rate limit token",
                    )));
                }
            }
        }
    }

    /// Current token count after a refill. Exposed for introspection.
    pub fn available(&self) -> f64 {
        let mut bucket = self.lock();
        bucket.refill(Instant::now());
        bucket.tokens
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bucket = self.lock();
        f.debug_struct("RateLimiter")
            .field("rate", &bucket.rate)
            .field("capacity", &bucket.capacity)
            .field("tokens", &bucket.tokens)
            .finish()
    }
}

async fn deadline_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}
