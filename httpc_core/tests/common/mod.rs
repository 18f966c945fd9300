#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use httpc_core::{
    HttpError, Request, RequestBody, RequestContext, Response, ResponseBody, Transport,
};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Sets up logging for tests
pub fn setup_logging() {
    use tracing::Level;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env()
        .unwrap();
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

/// Minimal in-process HTTP server: accepts `max_requests` connections, hands
/// each parsed request (1-based attempt number, body bytes) to the responder
/// and writes back whatever it returns.
pub async fn spawn_test_server<F, Fut>(
    max_requests: usize,
    responder: F,
) -> (
    SocketAddr,
    Arc<AtomicUsize>,
    Arc<Mutex<Vec<Vec<u8>>>>,
    tokio::task::JoinHandle<()>,
)
where
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Vec<u8>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let attempts_clone = attempts.clone();
    let bodies_clone = bodies.clone();
    let responder = Arc::new(responder);

    let handle = tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            let attempt = attempts_clone.fetch_add(1, Ordering::SeqCst) + 1;
            let body = read_request_body(&mut stream).await;
            bodies_clone.lock().unwrap().push(body);
            let response = responder(attempt).await;
            stream.write_all(&response).await.unwrap();
            let _ = stream.shutdown().await;
            if attempt >= max_requests {
                break;
            }
        }
    });

    (addr, attempts, bodies, handle)
}

/// Read one request off the stream: headers up to the blank line, then a
/// `Content-Length`-delimited body.
async fn read_request_body(stream: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return Vec::new();
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);
    body
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

pub fn http_response(status: u16, reason: &str, body: &str, extra_headers: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\n{extra_headers}Connection: close\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// One scripted transport outcome.
pub enum Script {
    Status(u16, &'static str),
    IoError(std::io::ErrorKind, &'static str),
}

/// Scripted in-memory transport: pops one outcome per attempt and records
/// the body bytes and content length it was handed.
pub struct MockTransport {
    script: Mutex<VecDeque<Script>>,
    pub calls: AtomicUsize,
    pub bodies: Mutex<Vec<(Vec<u8>, Option<u64>)>>,
}

impl MockTransport {
    pub fn new(script: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            bodies: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(
        &self,
        _ctx: &RequestContext,
        req: &mut Request,
    ) -> Result<Response, HttpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = match req.take_body() {
            RequestBody::Empty => Vec::new(),
            RequestBody::Bytes(b) => b.to_vec(),
            RequestBody::Reader(mut r) => {
                let mut buf = Vec::new();
                tokio::io::AsyncReadExt::read_to_end(&mut r, &mut buf)
                    .await
                    .unwrap();
                buf
            }
        };
        self.bodies
            .lock()
            .unwrap()
            .push((body, req.content_length()));

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("mock transport script exhausted");
        match step {
            Script::Status(code, body) => Ok(Response::new(
                StatusCode::from_u16(code).unwrap(),
                HeaderMap::new(),
                ResponseBody::buffered(Bytes::from_static(body.as_bytes())),
            )),
            Script::IoError(kind, msg) => Err(HttpError::Io {
                source: std::io::Error::new(kind, msg),
                location: snafu::Location::default(),
            }),
        }
    }
}
