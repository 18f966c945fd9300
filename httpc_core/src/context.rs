use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Caller-scoped execution budget: an optional absolute deadline plus a
/// cancellation token. Clones share the same token, so cancelling any clone
/// cancels every pipeline suspension point derived from it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Context with no deadline and no cancellation armed.
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: CancellationToken::new(),
        }
    }

    /// Context with an absolute deadline.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: CancellationToken::new(),
        }
    }

    /// Cancel this context. All pending waits derived from it wake promptly.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the context is cancelled. The deadline is enforced
    /// separately by the pipeline's timed waits.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline. `None` means unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn deadline_passed(&self) -> bool {
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// Derive a context whose deadline is the earlier of the current one and
    /// `now + limit`. The cancellation token is shared with the parent.
    pub fn narrowed(&self, limit: Duration) -> Self {
        let capped = Instant::now() + limit;
        Self {
            deadline: Some(match self.deadline {
                Some(d) => d.min(capped),
                None => capped,
            }),
            cancel: self.cancel.clone(),
        }
    }

    /// Child token for per-attempt scoping: cancelling the child does not
    /// cancel the caller, but cancelling the caller cancels the child.
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}
