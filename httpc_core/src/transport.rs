use crate::context::RequestContext;
use crate::http::error::{HttpError, TransportSnafu};
use crate::request::{Request, RequestBody};
use crate::response::{Response, ResponseBody};
use async_trait::async_trait;
use snafu::ResultExt;
use tokio_util::io::ReaderStream;

/// The underlying executor. Called exactly once per attempt; per-attempt
/// deadlines and cancellation are enforced by the attempt executor around
/// this call.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, ctx: &RequestContext, req: &mut Request)
    -> Result<Response, HttpError>;
}

/// Production transport over a shared `reqwest::Client`. Connection pooling,
/// TLS and protocol framing are delegated to reqwest.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
        })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReqwestTransport")
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(
        &self,
        _ctx: &RequestContext,
        req: &mut Request,
    ) -> Result<Response, HttpError> {
        let mut builder = self
            .client
            .request(req.method().clone(), req.url().clone())
            .headers(req.headers().clone());

        match req.take_body() {
            RequestBody::Empty => {}
            RequestBody::Bytes(bytes) => {
                builder = builder.body(bytes);
            }
            RequestBody::Reader(reader) => {
                if let Some(len) = req.content_length() {
                    builder = builder.header(reqwest::header::CONTENT_LENGTH, len);
                }
                builder = builder.body(reqwest::Body::wrap_stream(ReaderStream::new(reader)));
            }
        }

        let resp = builder.send().await.context(TransportSnafu)?;
        let status = resp.status();
        let headers = resp.headers().clone();
        Ok(Response::new(status, headers, ResponseBody::streaming(resp)))
    }
}
