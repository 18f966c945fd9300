use crate::http::error::{BodyReadSnafu, HttpError, InvalidHeaderSnafu, InvalidUrlSnafu};
use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use snafu::ResultExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use url::Url;

/// Header marking a POST/PATCH request as safe to replay.
pub const IDEMPOTENCY_KEY: &str = "idempotency-key";

/// Outbound request body. Readers are drained into memory once at pipeline
/// entry when retries are enabled; otherwise they stream straight through.
pub enum RequestBody {
    Empty,
    Bytes(Bytes),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl RequestBody {
    pub fn is_empty(&self) -> bool {
        match self {
            RequestBody::Empty => true,
            RequestBody::Bytes(b) => b.is_empty(),
            // Length unknown until drained.
            RequestBody::Reader(_) => false,
        }
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            RequestBody::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// An outbound request. Immutable after pipeline entry except for per-attempt
/// body restoration performed by the retry controller.
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: RequestBody,
    content_length: Option<u64>,
}

impl Request {
    pub fn new(method: Method, url: &str) -> Result<Self, HttpError> {
        let url = Url::parse(url).context(InvalidUrlSnafu { url })?;
        Ok(Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            content_length: Some(0),
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attach an `Idempotency-Key`, marking a POST/PATCH as replayable.
    pub fn idempotency_key(mut self, key: &str) -> Result<Self, HttpError> {
        let value = HeaderValue::from_str(key).context(InvalidHeaderSnafu {
            name: IDEMPOTENCY_KEY,
        })?;
        self.headers
            .insert(HeaderName::from_static(IDEMPOTENCY_KEY), value);
        Ok(self)
    }

    /// The idempotency key, if present and non-empty.
    pub fn idempotency_key_value(&self) -> Option<&str> {
        self.headers
            .get(IDEMPOTENCY_KEY)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn body_bytes(mut self, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        self.content_length = Some(bytes.len() as u64);
        self.body = if bytes.is_empty() {
            RequestBody::Empty
        } else {
            RequestBody::Bytes(bytes)
        };
        self
    }

    /// Stream a body from an async reader. Declared length is optional; when
    /// retries are enabled the reader is drained once at pipeline entry.
    pub fn body_reader(
        mut self,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        content_length: Option<u64>,
    ) -> Self {
        self.body = RequestBody::Reader(reader);
        self.content_length = content_length;
        self
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Drain the body into a single replayable buffer, recording its length
    /// as the declared content length. Returns the buffer so the retry
    /// controller can reinstall it on later attempts.
    pub(crate) async fn buffer_body(&mut self) -> Result<Bytes, HttpError> {
        let buffered = match std::mem::replace(&mut self.body, RequestBody::Empty) {
            RequestBody::Empty => Bytes::new(),
            RequestBody::Bytes(b) => b,
            RequestBody::Reader(mut r) => {
                let mut buf = Vec::new();
                r.read_to_end(&mut buf).await.context(BodyReadSnafu)?;
                Bytes::from(buf)
            }
        };
        self.restore_body(buffered.clone());
        Ok(buffered)
    }

    /// Reinstall the originally buffered body and its content length.
    pub(crate) fn restore_body(&mut self, original: Bytes) {
        self.content_length = Some(original.len() as u64);
        self.body = if original.is_empty() {
            RequestBody::Empty
        } else {
            RequestBody::Bytes(original)
        };
    }

    /// Hand the body to the transport. Leaves `Empty` behind; the retry
    /// controller restores the buffer before the next attempt.
    pub fn take_body(&mut self) -> RequestBody {
        std::mem::replace(&mut self.body, RequestBody::Empty)
    }
}
