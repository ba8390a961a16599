//! Interceptor pipeline: every outbound call runs pre-request decoration,
//! dispatch and response classification, in that order.
//!
//! Classification:
//! - 2xx: success; a payload message on 200/201 becomes a success notice.
//! - 401: silent; runs the logout protocol (guarded) and returns `Auth`.
//! - 500 and transport failures: announced, returned as `Server`/`Transport`.
//! - any other status: returned as `Response` with the original body.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::headers::IdentityHeaders;
use super::transport::{ApiRequest, ApiResponse, Transport};
use crate::error::{AppError, AppResult};
use crate::session::LogoutProtocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseClass {
    Success,
    Unauthorized,
    ServerFailure,
    Rejected,
}

impl ResponseClass {
    pub fn of(status: u16) -> Self {
        match status {
            200..=299 => ResponseClass::Success,
            401 => ResponseClass::Unauthorized,
            500 => ResponseClass::ServerFailure,
            _ => ResponseClass::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "level", content = "message", rename_all = "snake_case")]
pub enum Notice {
    Success(String),
    Error(String),
}

/// User-facing announcements. Always logged; forwarded to a listener when one
/// is attached. Delivery is cosmetic and never blocks a call.
#[derive(Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Notice>>,
}

impl Notifier {
    pub fn new() -> Self { Self::default() }

    pub fn with_listener() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn success(&self, message: &str) {
        info!(target: "pipeline", text = message, "notice");
        self.emit(Notice::Success(message.to_string()));
    }

    pub fn error(&self, message: &str) {
        error!(target: "pipeline", text = message, "error notice");
        self.emit(Notice::Error(message.to_string()));
    }

    fn emit(&self, notice: Notice) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(notice);
        }
    }
}

pub struct InterceptorPipeline {
    transport: Arc<dyn Transport>,
    identity: IdentityHeaders,
    logout: Arc<LogoutProtocol>,
    notifier: Notifier,
}

impl InterceptorPipeline {
    pub fn new(transport: Arc<dyn Transport>, identity: IdentityHeaders, logout: Arc<LogoutProtocol>, notifier: Notifier) -> Self {
        Self { transport, identity, logout, notifier }
    }

    pub fn logout(&self) -> &Arc<LogoutProtocol> { &self.logout }

    pub async fn execute(&self, mut req: ApiRequest) -> AppResult<Value> {
        self.identity.decorate(&mut req.headers);
        debug!(
            target: "pipeline",
            method = ?req.method,
            path = %req.path,
            device = req.headers.device_id.is_some(),
            bearer = req.headers.authorization.is_some(),
            "dispatch"
        );
        let path = req.path.clone();
        match self.transport.send(req).await {
            Ok(resp) => self.classify(&path, resp).await,
            Err(e) => {
                warn!(target: "pipeline", path = %path, error = %e, "transport failure");
                self.notifier.error("Network error, please try again later");
                Err(e.into())
            }
        }
    }

    /// Decode a successful payload into `T`.
    pub async fn execute_json<T: serde::de::DeserializeOwned>(&self, req: ApiRequest) -> AppResult<T> {
        let body = self.execute(req).await?;
        // Payloads are either the object itself or wrapped in `data`.
        let inner = match body {
            Value::Object(mut m) if m.contains_key("data") => m.remove("data").unwrap_or(Value::Null),
            other => other,
        };
        serde_json::from_value(inner).map_err(|e| AppError::internal("decode_failed".to_string(), e.to_string()))
    }

    async fn classify(&self, path: &str, resp: ApiResponse) -> AppResult<Value> {
        let status = resp.status;
        match ResponseClass::of(status) {
            ResponseClass::Success => {
                if matches!(status, 200 | 201) {
                    if let Some(msg) = resp.message() {
                        self.notifier.success(msg);
                    }
                }
                Ok(resp.body)
            }
            ResponseClass::Unauthorized => {
                info!(target: "pipeline", path, "credential rejected; starting logout");
                let outcome = self.logout.force_logout().await;
                debug!(target: "pipeline", suppressed = outcome.is_suppressed(), "logout after 401");
                let msg = resp.message().unwrap_or("session expired").to_string();
                Err(AppError::auth("unauthorized".to_string(), msg))
            }
            ResponseClass::ServerFailure => {
                let msg = resp.message().unwrap_or("Server error, please try again later").to_string();
                self.notifier.error(&msg);
                Err(AppError::server("http_500".to_string(), msg))
            }
            ResponseClass::Rejected => {
                let msg = resp.message().map(str::to_string).unwrap_or_else(|| format!("request failed with status {}", status));
                debug!(target: "pipeline", path, status, "non-success response");
                Err(AppError::response(status, msg, resp.body))
            }
        }
    }
}
