use crate::config::retry::RetryPolicy;
use chrono::Utc;
use rand::Rng;
use reqwest::header::HeaderMap;
use std::time::Duration;

/// Exponential delay after the given completed attempt (1-based), clamped to
/// the policy maximum. No delay precedes the first attempt.
pub(crate) fn exponential_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let base_ms = policy.base_delay.as_millis() as f64;
    let max_ms = policy.max_delay.as_millis() as f64;
    let delay_ms = (base_ms * 2f64.powi(attempt.saturating_sub(1).min(62) as i32)).min(max_ms);
    Duration::from_millis(delay_ms as u64)
}

/// Symmetric jitter: sample from [0, delay * jitter] and add or subtract with
/// equal probability, clamping the result into [0, max_delay] so the backoff
/// bound stays monotonic.
pub(crate) fn apply_jitter(delay: Duration, jitter: f64, max_delay: Duration) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay.min(max_delay);
    }
    let delay_ms = delay.as_millis() as f64;
    let spread = delay_ms * jitter;
    let mut rng = rand::rng();
    let offset = rng.random_range(0.0..=spread);
    let jittered = if rng.random_bool(0.5) {
        delay_ms + offset
    } else {
        delay_ms - offset
    };
    let clamped = jittered.clamp(0.0, max_delay.as_millis() as f64);
    Duration::from_millis(clamped as u64)
}

/// Parse a `Retry-After` header: integer seconds first, then an RFC1123
/// HTTP-date relative to now.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    // A date already in the past still counts as a parsed hint of zero.
    Some(
        (date.with_timezone(&Utc) - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO),
    )
}

/// Delay before the next attempt, after `attempt` completed. A parseable
/// `Retry-After` overrides the exponential schedule when the policy honors
/// it; otherwise jitter applies.
pub(crate) fn next_delay(
    policy: &RetryPolicy,
    attempt: u32,
    response_headers: Option<&HeaderMap>,
) -> Duration {
    if policy.respect_retry_after
        && let Some(headers) = response_headers
        && let Some(hinted) = retry_after(headers)
    {
        return hinted;
    }
    apply_jitter(
        exponential_delay(policy, attempt),
        policy.jitter,
        policy.max_delay,
    )
}
