//! Minimal HTTP/1 client with a hard deadline per exchange.
//!
//! Opens a fresh TCP connection per request, performs the hyper
//! handshake, sends the request and reads the full body, all inside a
//! single `tokio::time::timeout`. Only plain `http://` targets are
//! supported; TLS termination is the routing layer's job.

use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use thiserror::Error;
use tracing::debug;

const USER_AGENT: &str = concat!("rampart/", env!("CARGO_PKG_VERSION"));

/// Errors produced by the HTTP client.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read body: {0}")]
    Body(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl HttpResponse {
    /// Fail with `ProbeError::Status` unless the status is 2xx.
    pub fn error_for_status(self) -> Result<Self, ProbeError> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ProbeError::Status(self.status))
        }
    }

    /// Decode the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProbeError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Join a base URL and a path with exactly one `/` between them.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Issue a GET request.
pub async fn get(url: &str, timeout: Duration) -> Result<HttpResponse, ProbeError> {
    send(Method::GET, url, None, timeout).await
}

/// Issue a POST request with a JSON body.
pub async fn post_json<T: serde::Serialize>(
    url: &str,
    body: &T,
    timeout: Duration,
) -> Result<HttpResponse, ProbeError> {
    let payload = Bytes::from(serde_json::to_vec(body)?);
    send(Method::POST, url, Some(payload), timeout).await
}

async fn send(
    method: Method,
    url: &str,
    body: Option<Bytes>,
    timeout: Duration,
) -> Result<HttpResponse, ProbeError> {
    let target = Target::parse(url)?;

    match tokio::time::timeout(timeout, exchange(method, &target, body)).await {
        Ok(result) => result,
        Err(_) => {
            debug!(%url, ?timeout, "http request timed out");
            Err(ProbeError::Timeout(timeout))
        }
    }
}

async fn exchange(
    method: Method,
    target: &Target,
    body: Option<Bytes>,
) -> Result<HttpResponse, ProbeError> {
    let stream = tokio::net::TcpStream::connect(&target.address)
        .await
        .map_err(|e| ProbeError::Connect(e.to_string()))?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| ProbeError::Handshake(e.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut builder = http::Request::builder()
        .method(method)
        .uri(&target.path_and_query)
        .header("host", &target.host_header)
        .header("user-agent", USER_AGENT);
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let req = builder
        .body(Full::new(body.unwrap_or_default()))
        .map_err(|e| ProbeError::Request(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| ProbeError::Request(e.to_string()))?;

    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| ProbeError::Body(e.to_string()))?
        .to_bytes();

    Ok(HttpResponse { status, body })
}

/// A parsed request target.
#[derive(Debug, PartialEq, Eq)]
struct Target {
    /// `host:port` to connect to.
    address: String,
    /// Value for the `Host` header.
    host_header: String,
    /// Origin-form request target.
    path_and_query: String,
}

impl Target {
    fn parse(url: &str) -> Result<Self, ProbeError> {
        let uri: Uri = url.parse().map_err(|e: http::uri::InvalidUri| ProbeError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        match uri.scheme_str() {
            Some("http") => {}
            Some(other) => return Err(ProbeError::UnsupportedScheme(other.to_string())),
            None => {
                return Err(ProbeError::InvalidUrl {
                    url: url.to_string(),
                    reason: "missing scheme".to_string(),
                })
            }
        }

        let authority = uri.authority().ok_or_else(|| ProbeError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        })?;

        let port = authority.port_u16().unwrap_or(80);
        let path_and_query = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .filter(|pq| !pq.is_empty())
            .unwrap_or_else(|| "/".to_string());

        Ok(Self {
            address: format!("{}:{}", authority.host(), port),
            host_header: authority.as_str().to_string(),
            path_and_query,
        })
    }
}
