//! drnav ops: outbound HTTP to the services being orchestrated.
//! The `Transport` seam keeps reqwest out of the status walk and lets tests script replies.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use drnav_kubehub::TokenSource;
use tracing::{debug, warn};

mod remote;

pub use remote::{Dispatched, Mode, ModeChange, ProbeError, RemoteHealth, RemoteStatus, ServiceStatus};

/// Attempts per outbound call.
pub const RETRY_BUDGET: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("{method} {url} failed: {reason}")]
    Request { method: &'static str, url: String, reason: String },
    #[error("{method} {url} answered {status}")]
    Status { method: &'static str, url: String, status: u16 },
}

/// Raw reply; decoding is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn json(status: u16, body: serde_json::Value) -> Self { Self { status, body: body.to_string().into_bytes() } }
    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }
}

/// One outbound HTTP exchange, no retries.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, bearer: Option<&str>) -> Result<HttpReply, TransportError>;
    async fn post_json(&self, url: &str, body: &serde_json::Value, bearer: Option<&str>) -> Result<HttpReply, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub get_timeout: Duration,
    pub post_timeout: Duration,
    /// Attach the service-account bearer to outbound calls.
    pub back_auth: bool,
}

impl Default for HttpConfig {
    fn default() -> Self { Self { get_timeout: Duration::from_secs(10), post_timeout: Duration::from_secs(30), back_auth: false } }
}

/// reqwest-backed transport with separate GET/POST timeouts.
#[derive(Clone)]
pub struct HttpTransport {
    get_client: reqwest::Client,
    post_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(cfg: &HttpConfig) -> Result<Self, TransportError> {
        let build = |timeout: Duration| {
            reqwest::Client::builder().timeout(timeout).build().map_err(|e| TransportError::Request {
                method: "BUILD",
                url: String::new(),
                reason: e.to_string(),
            })
        };
        Ok(Self { get_client: build(cfg.get_timeout)?, post_client: build(cfg.post_timeout)? })
    }

    async fn send(method: &'static str, url: &str, req: reqwest::RequestBuilder) -> Result<HttpReply, TransportError> {
        let err = |e: reqwest::Error| TransportError::Request { method, url: url.to_string(), reason: e.to_string() };
        let resp = req.send().await.map_err(err)?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(err)?.to_vec();
        debug!(method, url = %url, status, "outbound request done");
        Ok(HttpReply { status, body })
    }
}

fn with_bearer(req: reqwest::RequestBuilder, bearer: Option<&str>) -> reqwest::RequestBuilder {
    match bearer {
        Some(t) => req.bearer_auth(t),
        None => req,
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, bearer: Option<&str>) -> Result<HttpReply, TransportError> {
        Self::send("GET", url, with_bearer(self.get_client.get(url), bearer)).await
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value, bearer: Option<&str>) -> Result<HttpReply, TransportError> {
        Self::send("POST", url, with_bearer(self.post_client.post(url).json(body), bearer)).await
    }
}

/// Transport plus bearer policy. The token is read from `tokens` on every attempt.
#[derive(Clone)]
pub struct Outbound {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenSource>,
    back_auth: bool,
}

impl Outbound {
    pub fn new(transport: Arc<dyn Transport>, tokens: Arc<dyn TokenSource>, back_auth: bool) -> Self {
        Self { transport, tokens, back_auth }
    }

    fn bearer(&self) -> Option<Arc<String>> { self.back_auth.then(|| self.tokens.token()) }

    /// GET with up to `RETRY_BUDGET` attempts; transport errors and non-2xx replies are retried.
    pub async fn get_with_retry(&self, url: &str) -> Result<HttpReply, TransportError> {
        let mut last = TransportError::Request { method: "GET", url: url.to_string(), reason: "no attempt made".into() };
        for attempt in 1..=RETRY_BUDGET {
            let bearer = self.bearer();
            match self.transport.get(url, bearer.as_deref().map(String::as_str)).await {
                Ok(reply) if reply.is_success() => return Ok(reply),
                Ok(reply) => {
                    warn!(url = %url, attempt, status = reply.status, "GET answered with non-success status");
                    last = TransportError::Status { method: "GET", url: url.to_string(), status: reply.status };
                }
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "GET failed");
                    last = e;
                }
            }
        }
        Err(last)
    }

    /// POST with up to `RETRY_BUDGET` attempts; only transport errors are retried, any reply is returned.
    pub async fn post_with_retry(&self, url: &str, body: &serde_json::Value) -> Result<HttpReply, TransportError> {
        let mut last = TransportError::Request { method: "POST", url: url.to_string(), reason: "no attempt made".into() };
        for attempt in 1..=RETRY_BUDGET {
            let bearer = self.bearer();
            match self.transport.post_json(url, body, bearer.as_deref().map(String::as_str)).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "POST failed");
                    last = e;
                }
            }
        }
        Err(last)
    }
}
