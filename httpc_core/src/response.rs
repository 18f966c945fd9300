use crate::http::error::{BodyLimitSnafu, DecodeSnafu, HttpError, HttpStatusSnafu, TransportSnafu};
use bytes::{Bytes, BytesMut};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use snafu::ResultExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Releases the per-attempt registration when the caller closes the body.
/// The pipeline relinquishes the cancel handle here on successful attempt
/// exit; dropping the guard is the single point of invocation.
pub(crate) struct AttemptGuard {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl AttemptGuard {
    pub(crate) fn new(cancel: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { cancel, deadline }
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum BodyInner {
    /// Remaining unread bytes of a fully buffered body.
    Buffered(Bytes),
    /// Live transport stream.
    Streaming(reqwest::Response),
}

/// Response body stream. Ownership transfers to the caller with the
/// response; dropping it (or consuming it via [`ResponseBody::bytes`])
/// releases the per-attempt deadline registration. Reads on a streaming body
/// remain bounded by the attempt deadline until then.
pub struct ResponseBody {
    inner: BodyInner,
    limit: Option<u64>,
    read: u64,
    guard: Option<AttemptGuard>,
}

impl ResponseBody {
    pub(crate) fn streaming(resp: reqwest::Response) -> Self {
        Self {
            inner: BodyInner::Streaming(resp),
            limit: None,
            read: 0,
            guard: None,
        }
    }

    /// A body over an in-memory buffer. The constructor for custom
    /// transports and tests.
    pub fn buffered(bytes: Bytes) -> Self {
        Self {
            inner: BodyInner::Buffered(bytes),
            limit: None,
            read: 0,
            guard: None,
        }
    }

    /// Next chunk of the body, or `None` once exhausted.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, HttpError> {
        let chunk = match &mut self.inner {
            BodyInner::Buffered(remaining) => {
                if remaining.is_empty() {
                    None
                } else {
                    Some(remaining.split_to(remaining.len()))
                }
            }
            BodyInner::Streaming(resp) => {
                let deadline = self.guard.as_ref().and_then(|g| g.deadline);
                match deadline {
                    Some(d) => tokio::select! {
                        c = resp.chunk() => c.context(TransportSnafu)?,
                        _ = tokio::time::sleep_until(d) => {
                            return Err(HttpError::from_io(std::io::Error::new(
                                std::io::ErrorKind::TimedOut,
                                "deadline exceeded while reading response body",
                            )));
                        }
                    },
                    None => resp.chunk().await.context(TransportSnafu)?,
                }
            }
        };
        if let Some(c) = &chunk {
            self.read += c.len() as u64;
            if let Some(limit) = self.limit
                && self.read > limit
            {
                return BodyLimitSnafu { limit }.fail();
            }
        }
        Ok(chunk)
    }

    /// Read the body to completion. Consumes the body, releasing the
    /// per-attempt registration on return.
    pub async fn bytes(mut self) -> Result<Bytes, HttpError> {
        match self.inner {
            BodyInner::Buffered(ref mut remaining) => {
                let out = remaining.split_to(remaining.len());
                if let Some(limit) = self.limit
                    && out.len() as u64 > limit
                {
                    return BodyLimitSnafu { limit }.fail();
                }
                Ok(out)
            }
            BodyInner::Streaming(_) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = self.chunk().await? {
                    buf.extend_from_slice(&chunk);
                }
                Ok(buf.freeze())
            }
        }
    }

    pub(crate) fn set_limit(&mut self, limit: Option<u64>) {
        self.limit = limit;
    }

    pub(crate) fn attach_guard(&mut self, guard: AttemptGuard) {
        self.guard = Some(guard);
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            BodyInner::Buffered(b) => write!(f, "ResponseBody::Buffered({} bytes)", b.len()),
            BodyInner::Streaming(_) => f.write_str("ResponseBody::Streaming(..)"),
        }
    }
}

/// A response handed back to the caller. The body must be consumed or
/// dropped to release the per-attempt deadline registration.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    trailers: HeaderMap,
    body: ResponseBody,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            trailers: HeaderMap::new(),
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }

    /// Declared content length, when the server sent one.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    /// Consume the response and read the body to completion.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        self.body.bytes().await
    }

    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// Surface a non-2xx status as an error, for callers that treat protocol
    /// failures like transport failures.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.status.is_client_error() || self.status.is_server_error() {
            HttpStatusSnafu {
                status: self.status,
            }
            .fail()
        } else {
            Ok(self)
        }
    }

    /// Decode the body as JSON.
    pub async fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, HttpError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).context(DecodeSnafu)
    }

    pub(crate) fn set_body_limit(&mut self, limit: Option<u64>) {
        self.body.set_limit(limit);
    }

    pub(crate) fn attach_guard(&mut self, guard: AttemptGuard) {
        self.body.attach_guard(guard);
    }

    /// Drain a streaming body into memory in place, preserving the attached
    /// guard. Used by the circuit breaker before caching a failure.
    pub(crate) async fn buffer_in_place(&mut self) -> Result<(), HttpError> {
        if let BodyInner::Streaming(_) = self.body.inner {
            let mut buf = BytesMut::new();
            while let Some(chunk) = self.body.chunk().await? {
                buf.extend_from_slice(&chunk);
            }
            self.body.inner = BodyInner::Buffered(buf.freeze());
            // The caller's capped read starts over on the buffered copy.
            self.body.read = 0;
        }
        Ok(())
    }

    /// Deep copy of a buffered response for failure replay. `None` while the
    /// body is still streaming.
    pub(crate) fn cached_copy(&self) -> Option<CachedResponse> {
        match &self.body.inner {
            BodyInner::Buffered(bytes) => Some(CachedResponse {
                status: self.status,
                headers: self.headers.clone(),
                trailers: self.trailers.clone(),
                body: bytes.clone(),
            }),
            BodyInner::Streaming(_) => None,
        }
    }
}

/// Snapshot of the last failure observed by the circuit breaker: status,
/// headers and trailers deep-copied, body held as an owned buffer. Each
/// replay yields an independent reader over a copy of the bytes.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    status: StatusCode,
    headers: HeaderMap,
    trailers: HeaderMap,
    body: Bytes,
}

impl CachedResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub(crate) fn replay(&self) -> Response {
        Response {
            status: self.status,
            headers: self.headers.clone(),
            trailers: self.trailers.clone(),
            body: ResponseBody::buffered(self.body.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffered_response(status: StatusCode, body: &'static [u8]) -> Response {
        Response::new(
            status,
            HeaderMap::new(),
            ResponseBody::buffered(Bytes::from_static(body)),
        )
    }

    #[tokio::test]
    async fn dropping_the_body_cancels_the_attempt_token() {
        let token = CancellationToken::new();
        let probe = token.child_token();
        let mut resp = buffered_response(StatusCode::OK, b"ok");
        resp.attach_guard(AttemptGuard::new(token, None));

        assert!(!probe.is_cancelled());
        drop(resp);
        assert!(probe.is_cancelled());
    }

    #[tokio::test]
    async fn consuming_the_body_cancels_the_attempt_token() {
        let token = CancellationToken::new();
        let probe = token.child_token();
        let mut resp = buffered_response(StatusCode::OK, b"payload");
        resp.attach_guard(AttemptGuard::new(token, None));

        let bytes = resp.bytes().await.unwrap();
        assert_eq!(&bytes[..], b"payload");
        assert!(probe.is_cancelled());
    }

    #[tokio::test]
    async fn replayed_clones_are_independent() {
        let resp = buffered_response(StatusCode::TOO_MANY_REQUESTS, b"too many requests");
        let cached = resp.cached_copy().unwrap();

        let first = cached.replay().bytes().await.unwrap();
        let second = cached.replay().bytes().await.unwrap();
        assert_eq!(&first[..], b"too many requests");
        assert_eq!(&second[..], b"too many requests");
    }

    #[tokio::test]
    async fn body_limit_is_enforced() {
        let mut resp = buffered_response(StatusCode::OK, b"0123456789");
        resp.set_body_limit(Some(4));
        let err = resp.bytes().await.unwrap_err();
        assert!(matches!(err, HttpError::BodyLimit { limit: 4, .. }));
    }

    #[test]
    fn error_for_status_wraps_non_2xx() {
        let err = buffered_response(StatusCode::NOT_FOUND, b"")
            .error_for_status()
            .unwrap_err();
        match err {
            HttpError::HttpStatus { status, .. } => assert_eq!(status, StatusCode::NOT_FOUND),
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    }
}
