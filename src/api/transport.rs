use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::headers::OutboundHeaders;
use crate::config::SessionConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the configured API base URL.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: OutboundHeaders,
}

impl ApiRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self { method, path: path.to_string(), query: Vec::new(), body: None, headers: OutboundHeaders::default() }
    }

    pub fn get(path: &str) -> Self { Self::new(Method::Get, path) }

    pub fn post(path: &str, body: Value) -> Self {
        let mut r = Self::new(Method::Post, path);
        r.body = Some(body);
        r
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self { Self { status, body } }

    /// User-facing message carried by the payload, if any.
    pub fn message(&self) -> Option<&str> {
        ["message", "msg"]
            .iter()
            .find_map(|k| self.body.get(*k).and_then(|v| v.as_str()).filter(|m| !m.trim().is_empty()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid header {0}")]
    InvalidHeader(String),
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        let code = match &err {
            TransportError::Timeout => "timeout",
            TransportError::Connect(_) => "connect_failed",
            TransportError::Request(_) => "request_failed",
            TransportError::InvalidHeader(_) => "invalid_header",
        };
        AppError::transport(code.to_string(), err.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

/// Dispatches a fully decorated request. Status codes are not interpreted here.
pub trait Transport: Send + Sync {
    fn send(&self, req: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, TransportError>>;
}

/// HTTP transport with the configured request timeout.
pub struct ReqwestTransport {
    client: reqwest::Client,
    config: Arc<SessionConfig>,
}

impl ReqwestTransport {
    pub fn new(config: Arc<SessionConfig>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(config.api_timeout()).build()?;
        Ok(Self { client, config })
    }

    async fn dispatch(&self, req: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.config.endpoint(&req.path);
        let headers = req.headers.to_header_map(&self.config.device_header)?;
        let mut builder = match req.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Patch => self.client.patch(&url),
            Method::Delete => self.client.delete(&url),
        };
        builder = builder.headers(headers);
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        debug!(target: "pipeline", method = ?req.method, path = %req.path, status, "response received");
        Ok(ApiResponse { status, body })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, req: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, TransportError>> {
        Box::pin(self.dispatch(req))
    }
}
