//! Shared fixtures for integration tests: a scripted transport and a
//! memory-backed identity context.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;

use picart::api::{ApiRequest, ApiResponse, Transport, TransportError};
use picart::channel::MemoryChannel;
use picart::config::SessionConfig;
use picart::context::IdentityContext;
use picart::identity::{EnvironmentFingerprinter, EnvironmentSignals};
use picart::session::{Navigator, RenderMode};

#[derive(Clone)]
enum Scripted {
    Respond(u16, Value),
    Fail,
}

/// Transport answering per path with a fixed response. Unscripted paths
/// answer 404. Every dispatched request is recorded.
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, Scripted>>,
    seen: Mutex<Vec<ApiRequest>>,
    delay: Duration,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self { routes: Mutex::new(HashMap::new()), seen: Mutex::new(Vec::new()), delay })
    }

    pub fn respond(&self, path: &str, status: u16, body: Value) {
        self.routes.lock().insert(path.to_string(), Scripted::Respond(status, body));
    }

    pub fn fail(&self, path: &str) {
        self.routes.lock().insert(path.to_string(), Scripted::Fail);
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.seen.lock().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.seen.lock().iter().filter(|r| r.path == path).count()
    }

    pub fn last(&self) -> Option<ApiRequest> {
        self.seen.lock().last().cloned()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, req: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, TransportError>> {
        Box::pin(async move {
            let scripted = self.routes.lock().get(&req.path).cloned();
            self.seen.lock().push(req);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match scripted {
                Some(Scripted::Respond(status, body)) => Ok(ApiResponse::new(status, body)),
                Some(Scripted::Fail) => Err(TransportError::Connect("connection refused".into())),
                None => Ok(ApiResponse::new(404, serde_json::json!({"message": "not found"}))),
            }
        })
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    pub visits: Mutex<Vec<String>>,
}

impl Navigator for RecordingNavigator {
    fn redirect(&self, path: &str) {
        self.visits.lock().push(path.to_string());
    }
}

pub fn profile_body(username: &str, roles: &[&str]) -> Value {
    let roles: Vec<Value> = roles.iter().map(|r| serde_json::json!({"name": r})).collect();
    serde_json::json!({"code": 200, "data": {"id": 7, "username": username, "roles": roles}})
}

pub struct Harness {
    pub channel: Arc<MemoryChannel>,
    pub transport: Arc<ScriptedTransport>,
    pub navigator: Arc<RecordingNavigator>,
    pub ctx: IdentityContext,
}

pub fn harness_with(mode: RenderMode, transport: Arc<ScriptedTransport>, channel: Arc<MemoryChannel>) -> Harness {
    let mut config = SessionConfig::default();
    config.bootstrap_retry.initial_backoff_ms = 20;
    let navigator = Arc::new(RecordingNavigator::default());
    let signals = EnvironmentSignals::new().with("user-agent", "picart-tests/1.0").with("accept-language", "en-GB");
    let ctx = IdentityContext::builder(mode, Arc::new(config), channel.clone(), transport.clone())
        .fingerprinter(Arc::new(EnvironmentFingerprinter::new(signals)))
        .navigator(navigator.clone())
        .build();
    Harness { channel, transport, navigator, ctx }
}

pub fn harness(mode: RenderMode) -> Harness {
    harness_with(mode, ScriptedTransport::new(), Arc::new(MemoryChannel::new()))
}
