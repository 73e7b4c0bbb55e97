//! Minimal HTTP/1.1 server.
//!
//! Handlers are registered explicitly on a [`Router`] that is handed to
//! [`serve`]; there is no process-wide route table. One request is served per
//! connection and the connection is closed after the response.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StatusError;

/// Largest request head we are willing to buffer.
pub const MAX_HEAD_BYTES: usize = 8 * 1024;
const MAX_HEADERS: usize = 32;

/// How long a client gets to send its request head before the connection
/// is answered with 408 and closed.
pub const HEAD_READ_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: String,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Arc<[u8]>,
}

impl Response {
    pub fn new(status: u16, content_type: &str, body: Arc<[u8]>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", content_type.to_string())],
            body,
        }
    }

    pub fn html(body: Arc<[u8]>) -> Self {
        Self::new(200, "text/html; charset=utf-8", body)
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self::new(status, "text/plain; charset=utf-8", Arc::from(body.as_bytes()))
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Status line and headers, terminated by the blank line.
    pub fn head(&self) -> String {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason(self.status));
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            self.body.len()
        ));
        head
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Something that answers requests for one path.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, req: Request) -> BoxFuture<'static, Response>;
}

/// Exact-path route table.
#[derive(Default)]
pub struct Router {
    routes: HashMap<String, Arc<dyn Handler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `path`. Each path can be registered once.
    pub fn handle(
        &mut self,
        path: impl Into<String>,
        handler: impl Handler,
    ) -> Result<(), StatusError> {
        let path = path.into();
        if self.routes.contains_key(&path) {
            return Err(StatusError::DuplicateRoute(path));
        }
        self.routes.insert(path, Arc::new(handler));
        Ok(())
    }

    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    pub async fn dispatch(&self, req: Request) -> Response {
        match self.routes.get(&req.path) {
            Some(handler) => handler.call(req).await,
            None => Response::text(404, "not found\n"),
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("paths", &self.paths()).finish()
    }
}

// ---------------------------------------------------------------------------
// Wire
// ---------------------------------------------------------------------------

/// Parse a request head. `Ok(None)` means more bytes are needed.
pub fn parse_request(buf: &[u8]) -> Result<Option<Request>, httparse::Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf)? {
        httparse::Status::Partial => Ok(None),
        httparse::Status::Complete(_) => {
            let target = req.path.unwrap_or("/");
            let (path, query) = target.split_once('?').unwrap_or((target, ""));
            Ok(Some(Request {
                method: req.method.unwrap_or("").to_string(),
                path: path.to_string(),
                query: query.to_string(),
            }))
        }
    }
}

/// Accept connections until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    router: Arc<Router>,
    cancel: CancellationToken,
) -> Result<(), StatusError> {
    serve_with_timeout(listener, router, cancel, HEAD_READ_TIMEOUT).await
}

/// [`serve`] with a custom deadline for reading each request head.
pub async fn serve_with_timeout(
    listener: TcpListener,
    router: Arc<Router>,
    cancel: CancellationToken,
    head_timeout: Duration,
) -> Result<(), StatusError> {
    info!(addr = ?listener.local_addr().ok(), paths = ?router.paths(), "HTTP server listening");

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => {
                info!("HTTP server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let router = Arc::clone(&router);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &router, head_timeout).await {
                debug!(peer = %peer, error = %e, "connection error");
            }
        });
    }
}

enum Head {
    Request(Request),
    Invalid,
    Closed,
}

async fn read_head(stream: &mut TcpStream) -> Result<Head, StatusError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(Head::Closed);
        }
        buf.extend_from_slice(&chunk[..n]);
        match parse_request(&buf) {
            Ok(Some(req)) => return Ok(Head::Request(req)),
            Ok(None) if buf.len() < MAX_HEAD_BYTES => continue,
            Ok(None) | Err(_) => return Ok(Head::Invalid),
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    router: &Router,
    head_timeout: Duration,
) -> Result<(), StatusError> {
    let response = match tokio::time::timeout(head_timeout, read_head(&mut stream)).await {
        Ok(Ok(Head::Request(req))) => {
            debug!(method = %req.method, path = %req.path, "request");
            router.dispatch(req).await
        }
        Ok(Ok(Head::Invalid)) => Response::text(400, "bad request\n"),
        Ok(Ok(Head::Closed)) => return Ok(()),
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            debug!(timeout = ?head_timeout, "request head not received in time");
            Response::text(408, "request timeout\n")
        }
    };

    stream.write_all(response.head().as_bytes()).await?;
    stream.write_all(&response.body).await?;
    stream.shutdown().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
