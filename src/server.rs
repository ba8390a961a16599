//!
//! picart render-pass host
//! -----------------------
//! Axum server standing in for the stateless render pass. Every request gets a
//! fresh `IdentityContext` over its own cookies; the session is bootstrapped
//! before the response is produced and the pass's cookie mutations are
//! returned as `Set-Cookie` headers.
//!
//! Routes:
//! - `GET /health`: liveness and uptime.
//! - `GET /session`: bootstrap and return the identity snapshot.
//! - `GET /session/route?path=..&requires_auth=..`: route guard decision.
//! - `POST /session/consent`, `DELETE /session/consent`: record or revoke consent.
//! - `POST /session/logout`: run the logout protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::api::{ReqwestTransport, Transport};
use crate::channel::RequestCookieChannel;
use crate::config::SessionConfig;
use crate::consent::ConsentCategories;
use crate::context::IdentityContext;
use crate::error::AppError;

const REQUEST_ID: &str = "x-request-id";

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SessionConfig>,
    pub transport: Arc<dyn Transport>,
    pub started: Instant,
}

impl AppState {
    pub fn new(config: Arc<SessionConfig>, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport, started: Instant::now() }
    }

    fn render_pass(&self, headers: &HeaderMap) -> (IdentityContext, Arc<RequestCookieChannel>) {
        IdentityContext::for_render_pass(headers, self.config.clone(), self.transport.clone())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/session", get(session))
        .route("/session/route", get(route_decision))
        .route("/session/consent", post(grant_consent).delete(revoke_consent))
        .route("/session/logout", post(logout))
        .with_state(state)
}

/// Start the render-pass host on the given port.
pub async fn run_with_port(config: SessionConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(config.clone())?);
    let app = router(AppState::new(config.clone(), transport));

    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    info!(target: "server", api = %config.api_base_url, secure_cookies = config.secure_cookies, "Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Finish a render pass: refresh forwarded identity cookies, then attach every
/// `Set-Cookie` value the pass produced.
fn finish_pass(ctx: &IdentityContext, channel: &RequestCookieChannel) -> HeaderMap {
    channel.forward_important_cookies(&ctx.config, ctx.ledger.necessary_granted());
    let mut headers = HeaderMap::new();
    for cookie in channel.set_cookie_headers() {
        match HeaderValue::from_str(&cookie) {
            Ok(v) => {
                headers.append(axum::http::header::SET_COOKIE, v);
            }
            Err(e) => warn!(target: "server", error = %e, "dropping unencodable Set-Cookie"),
        }
    }
    headers.insert(HeaderName::from_static(REQUEST_ID), request_id());
    headers
}

fn request_id() -> HeaderValue {
    let id = uuid::Uuid::new_v4().to_string();
    HeaderValue::from_str(&id).unwrap_or_else(|_| HeaderValue::from_static("unknown"))
}

fn error_response(e: &AppError) -> Response {
    if e.http_status() >= 500 {
        error!(target: "server", code = e.code_str(), "request failed: {}", e.message());
    }
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut headers = HeaderMap::new();
    headers.insert(HeaderName::from_static(REQUEST_ID), request_id());
    (status, headers, Json(json!({"status": "error", "code": e.code_str(), "error": e.message()}))).into_response()
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(axum::http::header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    let body = json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_secs": state.started.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, headers, Json(body))
}

async fn session(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let (ctx, channel) = state.render_pass(&headers);
    let report = ctx.bootstrap().await;
    let snapshot = ctx.snapshot();
    let out = finish_pass(&ctx, &channel);
    (StatusCode::OK, out, Json(json!({"status": "ok", "bootstrap": report, "identity": snapshot})))
}

#[derive(Debug, Deserialize)]
struct RouteQuery {
    path: String,
    #[serde(default)]
    requires_auth: bool,
}

async fn route_decision(State(state): State<AppState>, headers: HeaderMap, Query(q): Query<RouteQuery>) -> impl IntoResponse {
    let (ctx, channel) = state.render_pass(&headers);
    ctx.bootstrap().await;
    let decision = ctx.route(&q.path, q.requires_auth);
    let out = finish_pass(&ctx, &channel);
    (StatusCode::OK, out, Json(json!({"status": "ok", "route": decision})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ConsentAction {
    AcceptAll,
    RejectAll,
    Custom,
}

#[derive(Debug, Deserialize)]
struct ConsentPayload {
    action: ConsentAction,
    #[serde(default)]
    settings: Option<ConsentCategories>,
}

async fn grant_consent(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<ConsentPayload>) -> Response {
    let categories = match (payload.action, payload.settings) {
        (ConsentAction::AcceptAll, _) => ConsentCategories::all(),
        (ConsentAction::RejectAll, _) => ConsentCategories::necessary_only(),
        (ConsentAction::Custom, Some(s)) => s,
        (ConsentAction::Custom, None) => {
            return error_response(&AppError::user("missing_settings", "custom consent requires settings"));
        }
    };
    let (ctx, channel) = state.render_pass(&headers);
    let result = ctx.grant_consent(categories).await;
    let out = finish_pass(&ctx, &channel);
    match result {
        Ok(record) => (StatusCode::OK, out, Json(json!({"status": "ok", "consent": record, "device": ctx.device.current()}))).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn revoke_consent(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (ctx, channel) = state.render_pass(&headers);
    let result = ctx.revoke_consent();
    let out = finish_pass(&ctx, &channel);
    match result {
        Ok(()) => (StatusCode::OK, out, Json(json!({"status": "ok"}))).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let (ctx, channel) = state.render_pass(&headers);
    let outcome = ctx.logout(true).await;
    let out = finish_pass(&ctx, &channel);
    (StatusCode::OK, out, Json(json!({"status": "ok", "logout": outcome})))
}
