use crate::http::error::{CircuitOpenSnafu, HttpError};
use crate::response::{CachedResponse, Response};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Breaker phase: permitting calls, short-circuiting with the cached
/// failure, or permitting a limited probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker. Zero disables opening.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// How long the breaker stays open before admitting a probe.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

type Observer = dyn Fn(BreakerState, BreakerState) + Send + Sync;

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
    last_failure: Option<CachedResponse>,
}

/// State-machine circuit breaker. All transitions and counter updates happen
/// under one critical section; the gated call runs outside it, and counters
/// move only after that call returns, so a panicking inner call cannot leave
/// the machine half-updated.
///
/// While open, callers receive [`HttpError::CircuitOpen`] carrying an
/// independent replay of the last failure observed before opening.
pub struct CircuitBreaker {
    config: BreakerConfig,
    observer: Option<Box<Observer>>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            observer: None,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
                last_failure: None,
            }),
        }
    }

    /// Install a state-change observer, invoked with (from, to) on every
    /// transition. The observer runs inside the breaker's critical section
    /// and must not re-enter the breaker.
    pub fn with_observer(
        config: BreakerConfig,
        observer: impl Fn(BreakerState, BreakerState) + Send + Sync + 'static,
    ) -> Self {
        let mut breaker = Self::new(config);
        breaker.observer = Some(Box::new(observer));
        breaker
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        match to {
            BreakerState::Open => {
                inner.opened_at = Some(Instant::now());
                inner.success_count = 0;
                warn!(from = from.as_str(), to = to.as_str(), "circuit breaker opened");
            }
            BreakerState::HalfOpen => {
                inner.success_count = 0;
                inner.failure_count = 0;
                debug!(from = from.as_str(), to = to.as_str(), "circuit breaker probing");
            }
            BreakerState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.opened_at = None;
                inner.last_failure = None;
                debug!(from = from.as_str(), to = to.as_str(), "circuit breaker closed");
            }
        }
        if let Some(observer) = &self.observer {
            observer(from, to);
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Return to Closed with zeroed counters, discarding the cached failure.
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, BreakerState::Closed);
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.opened_at = None;
        inner.last_failure = None;
    }

    /// Gate a call. Open and not yet eligible for a probe: short-circuit
    /// with a replay of the cached failure, produced inside the critical
    /// section. Open and eligible: move to HalfOpen and admit the call.
    pub(crate) fn check(&self) -> Result<(), HttpError> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let eligible = match inner.opened_at {
                    Some(at) => Instant::now() >= at + self.config.reset_timeout,
                    None => true,
                };
                if eligible {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    Ok(())
                } else {
                    let last = inner.last_failure.as_ref().map(|c| Box::new(c.replay()));
                    CircuitOpenSnafu { last }.fail()
                }
            }
        }
    }

    /// Observe the result of a gated call. A result is a success iff there
    /// is a response with status < 500; 4xx counts as success, only 5xx and
    /// transport errors feed the failure counter. Failure response bodies
    /// are drained outside the lock; the deep clone is produced under it.
    pub(crate) async fn record(
        &self,
        result: Result<Response, HttpError>,
    ) -> Result<Response, HttpError> {
        match result {
            Ok(mut resp) => {
                if resp.status().as_u16() < 500 {
                    self.on_success();
                    Ok(resp)
                } else {
                    if let Err(e) = resp.buffer_in_place().await {
                        self.on_failure(None);
                        return Err(e);
                    }
                    self.on_failure(Some(&resp));
                    Ok(resp)
                }
            }
            Err(e) => {
                self.on_failure(None);
                Err(e)
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => inner.failure_count = 0,
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, BreakerState::Closed);
                }
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self, failure: Option<&Response>) {
        let mut inner = self.lock();
        // The deep clone happens while the lock is held; a concurrent replay
        // can never observe a torn snapshot.
        if let Some(resp) = failure
            && let Some(c) = resp.cached_copy()
        {
            inner.last_failure = Some(c);
        }
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if self.config.failure_threshold > 0
                    && inner.failure_count >= self.config.failure_threshold
                {
                    self.transition(&mut inner, BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => {
                self.transition(&mut inner, BreakerState::Open);
            }
            BreakerState::Open => {}
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .field("success_count", &inner.success_count)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ResponseBody;
    use bytes::Bytes;
    use reqwest::StatusCode;
    use reqwest::header::HeaderMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn response(status: StatusCode, body: &'static [u8]) -> Response {
        Response::new(
            status,
            HeaderMap::new(),
            ResponseBody::buffered(Bytes::from_static(body)),
        )
    }

    fn transport_error() -> HttpError {
        HttpError::from_io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ))
    }

    async fn fail_times(breaker: &CircuitBreaker, n: u32) {
        for _ in 0..n {
            let _ = breaker.record(Err(transport_error())).await;
        }
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            ..BreakerConfig::default()
        });
        fail_times(&breaker, 2).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
        fail_times(&breaker, 1).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn a_success_resets_the_failure_streak() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 2,
            ..BreakerConfig::default()
        });
        fail_times(&breaker, 1).await;
        breaker
            .record(Ok(response(StatusCode::OK, b"ok")))
            .await
            .unwrap();
        fail_times(&breaker, 1).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn client_errors_count_as_success() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            ..BreakerConfig::default()
        });
        breaker
            .record(Ok(response(StatusCode::NOT_FOUND, b"missing")))
            .await
            .unwrap();
        breaker
            .record(Ok(response(StatusCode::TOO_MANY_REQUESTS, b"slow down")))
            .await
            .unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn zero_failure_threshold_never_opens() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 0,
            ..BreakerConfig::default()
        });
        fail_times(&breaker, 50).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn open_replays_the_cached_failure() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(60),
            ..BreakerConfig::default()
        });
        breaker
            .record(Ok(response(
                StatusCode::SERVICE_UNAVAILABLE,
                b"upstream down",
            )))
            .await
            .unwrap();
        assert_eq!(breaker.state(), BreakerState::Open);

        let mut err = breaker.check().unwrap_err();
        let replay = err.replayed_response().expect("cached failure");
        assert_eq!(replay.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(&replay.bytes().await.unwrap()[..], b"upstream down");

        // A second short-circuit replays an independent copy.
        let mut err = breaker.check().unwrap_err();
        let replay = err.replayed_response().expect("cached failure");
        assert_eq!(&replay.bytes().await.unwrap()[..], b"upstream down");
    }

    #[tokio::test(start_paused = true)]
    async fn probe_closes_after_enough_successes() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            reset_timeout: Duration::from_millis(20),
        });
        fail_times(&breaker, 1).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_millis(25)).await;
        breaker.check().unwrap();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker
            .record(Ok(response(StatusCode::OK, b"ok")))
            .await
            .unwrap();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker
            .record(Ok(response(StatusCode::OK, b"ok")))
            .await
            .unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            reset_timeout: Duration::from_millis(20),
        });
        fail_times(&breaker, 1).await;
        tokio::time::advance(Duration::from_millis(25)).await;
        breaker.check().unwrap();
        fail_times(&breaker, 1).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_reset_timeout_probes_immediately() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            reset_timeout: Duration::ZERO,
        });
        fail_times(&breaker, 1).await;
        assert_eq!(breaker.state(), BreakerState::Open);
        breaker.check().unwrap();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[tokio::test]
    async fn reset_discards_counters_and_cache() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(60),
            ..BreakerConfig::default()
        });
        breaker
            .record(Ok(response(StatusCode::INTERNAL_SERVER_ERROR, b"boom")))
            .await
            .unwrap();
        assert_eq!(breaker.state(), BreakerState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.check().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn observer_sees_every_transition() {
        let transitions = Arc::new(AtomicU32::new(0));
        let seen = transitions.clone();
        let breaker = CircuitBreaker::with_observer(
            BreakerConfig {
                failure_threshold: 1,
                success_threshold: 1,
                reset_timeout: Duration::from_millis(10),
            },
            move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            },
        );

        fail_times(&breaker, 1).await; // closed -> open
        tokio::time::advance(Duration::from_millis(15)).await;
        breaker.check().unwrap(); // open -> half-open
        breaker
            .record(Ok(response(StatusCode::OK, b"ok")))
            .await
            .unwrap(); // half-open -> closed
        assert_eq!(transitions.load(Ordering::SeqCst), 3);
    }
}
