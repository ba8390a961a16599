//! Interceptor pipeline integration tests: header injection, response
//! classification and the guarded logout it drives.

mod common;

use std::time::Duration;

use serde_json::json;

use common::{harness, harness_with, profile_body, ScriptedTransport};
use picart::api::{ApiRequest, Notice, Notifier};
use picart::channel::{MemoryChannel, PersistedChannel};
use picart::config::{keys, SessionConfig};
use picart::consent::ConsentCategories;
use picart::error::AppError;
use picart::session::{BootstrapOutcome, LogoutOutcome, RenderMode, CREDENTIAL_KEYS};

#[tokio::test]
async fn scenario_c_bearer_header_carries_credential() {
    let h = harness(RenderMode::Persistent);
    h.transport.respond("/articles", 200, json!({"data": []}));
    h.ctx.store.set_credential("tok1", None).unwrap();

    h.ctx.api.call(ApiRequest::get("/articles")).await.unwrap();

    let req = h.transport.last().unwrap();
    assert_eq!(req.headers.authorization.as_deref(), Some("Bearer tok1"));
    let map = req.headers.to_header_map("x-device-id").unwrap();
    assert_eq!(map.get("authorization").unwrap(), "Bearer tok1");
}

#[tokio::test]
async fn p4_authorization_header_follows_authentication() {
    let h = harness(RenderMode::Persistent);
    h.transport.respond("/articles", 200, json!({}));

    h.ctx.api.call(ApiRequest::get("/articles")).await.unwrap();
    assert!(!h.ctx.store.is_authenticated());
    assert!(h.transport.last().unwrap().headers.authorization.is_none());

    h.ctx.store.set_credential("tok2", None).unwrap();
    h.ctx.api.call(ApiRequest::get("/articles")).await.unwrap();
    assert_eq!(h.transport.last().unwrap().headers.bearer(), Some("tok2"));

    h.ctx.logout(false).await;
    h.ctx.api.call(ApiRequest::get("/articles")).await.unwrap();
    assert!(!h.ctx.store.is_authenticated());
    assert!(h.transport.last().unwrap().headers.authorization.is_none());
}

#[tokio::test]
async fn first_render_request_falls_back_to_persisted_token() {
    let h = harness(RenderMode::Stateless);
    let cfg = SessionConfig::default();
    h.channel.write(keys::AUTH_TOKEN, "cookie-tok", &cfg.policy_for(keys::AUTH_TOKEN)).unwrap();
    h.transport.respond("/articles", 200, json!({}));

    h.ctx.api.call(ApiRequest::get("/articles")).await.unwrap();
    assert_eq!(h.transport.last().unwrap().headers.bearer(), Some("cookie-tok"));
}

#[tokio::test]
async fn logout_with_failed_erase_does_not_resurrect_credential() {
    let h = harness(RenderMode::Stateless);
    let cfg = SessionConfig::default();
    h.channel.write(keys::AUTH_TOKEN, "cookie-tok", &cfg.policy_for(keys::AUTH_TOKEN)).unwrap();
    h.transport.respond("/user/profile", 200, profile_body("ada", &[]));
    h.transport.respond("/articles", 200, json!({}));
    assert!(h.ctx.bootstrap().await.authenticated);

    h.channel.set_reject_erases(true);
    let LogoutOutcome::Completed(report) = h.ctx.logout(false).await else { panic!("logout suppressed") };
    assert!(report.erase_failures > 0);
    assert_eq!(h.channel.read(keys::AUTH_TOKEN).as_deref(), Some("cookie-tok"));

    h.ctx.api.call(ApiRequest::get("/articles")).await.unwrap();
    assert!(!h.ctx.store.is_authenticated());
    assert!(h.transport.last().unwrap().headers.authorization.is_none());

    let again = h.ctx.bootstrap().await;
    assert_eq!(again.outcome, BootstrapOutcome::Anonymous);
    assert!(!again.adopted);
    assert!(!again.authenticated);
}

#[tokio::test]
async fn device_header_only_with_consent_and_never_generated_mid_request() {
    let h = harness(RenderMode::Persistent);
    h.transport.respond("/articles", 200, json!({}));

    h.ctx.api.call(ApiRequest::get("/articles")).await.unwrap();
    assert!(h.transport.last().unwrap().headers.device_id.is_none());

    // Consent alone does not issue an id on the request path.
    h.ctx.ledger.reject_all().unwrap();
    h.ctx.api.call(ApiRequest::get("/articles")).await.unwrap();
    assert!(h.transport.last().unwrap().headers.device_id.is_none());
    assert!(h.channel.read(keys::DEVICE_ID).is_none());

    let id = h.ctx.device.resolve().await.unwrap();
    h.ctx.api.call(ApiRequest::get("/articles")).await.unwrap();
    assert_eq!(h.transport.last().unwrap().headers.device_id.as_deref(), Some(id.id.as_str()));
}

#[tokio::test]
async fn p3_concurrent_401s_tear_down_once() {
    let transport = ScriptedTransport::with_delay(Duration::from_millis(10));
    let h = harness_with(RenderMode::Persistent, transport, std::sync::Arc::new(MemoryChannel::new()));
    h.transport.respond("/articles", 401, json!({"message": "token expired"}));
    h.ctx.store.set_credential("stale", Some("r")).unwrap();

    let calls = (0..10).map(|_| h.ctx.api.call(ApiRequest::get("/articles")));
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(|r| matches!(r, Err(AppError::Auth { .. }))));
    assert!(results.iter().all(|r| !r.as_ref().unwrap_err().is_user_visible()));
    assert_eq!(h.ctx.logout.teardown_count(), 1);
    assert_eq!(h.navigator.visits.lock().len(), 1);
    assert!(!h.ctx.store.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn scenario_d_401_clears_session_and_cooldown_holds() {
    let h = harness(RenderMode::Persistent);
    h.transport.respond("/articles", 401, json!({}));
    h.ctx.store.set_credential("tok", Some("ref")).unwrap();
    h.ctx.store.remember_username("lin").unwrap();

    let err = h.ctx.api.call(ApiRequest::get("/articles")).await.unwrap_err();
    assert!(err.is_auth());
    assert!(!h.ctx.store.is_authenticated());
    assert!(h.ctx.store.profile().is_none());
    for k in CREDENTIAL_KEYS {
        assert!(h.channel.read(k).is_none(), "{k} not erased");
    }
    assert_eq!(h.ctx.logout.teardown_count(), 1);

    tokio::time::advance(Duration::from_millis(900)).await;
    h.ctx.store.set_credential("tok-again", None).unwrap();
    h.ctx.api.call(ApiRequest::get("/articles")).await.unwrap_err();
    assert_eq!(h.ctx.logout.teardown_count(), 1);
    // Suppressed teardown leaves the new credential alone.
    assert!(h.ctx.store.is_authenticated());
    // A 401 never reaches the server logout endpoint.
    assert_eq!(h.transport.calls_to("/user/logout"), 0);
}

#[tokio::test]
async fn server_failures_are_reported_without_touching_session() {
    let h = harness(RenderMode::Persistent);
    h.ctx.store.set_credential("tok", None).unwrap();
    h.transport.respond("/boom", 500, json!({"message": "database offline"}));
    h.transport.fail("/down");

    let e = h.ctx.api.call(ApiRequest::get("/boom")).await.unwrap_err();
    assert_eq!(e, AppError::server("http_500", "database offline"));
    let e = h.ctx.api.call(ApiRequest::get("/down")).await.unwrap_err();
    assert_eq!(e.code_str(), "connect_failed");
    assert!(e.is_user_visible());

    assert!(h.ctx.store.is_authenticated());
    assert_eq!(h.ctx.logout.teardown_count(), 0);
}

#[tokio::test]
async fn other_statuses_return_typed_error_with_body() {
    let h = harness(RenderMode::Persistent);
    let body = json!({"message": "title too long", "field": "title"});
    h.transport.respond("/articles", 422, body.clone());

    match h.ctx.api.call(ApiRequest::post("/articles", json!({"title": "x"}))).await {
        Err(AppError::Response { status, body: b, message, .. }) => {
            assert_eq!(status, 422);
            assert_eq!(b, body);
            assert_eq!(message, "title too long");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn notices_surface_success_and_server_errors() {
    let transport = ScriptedTransport::new();
    transport.respond("/articles", 201, json!({"message": "Article published"}));
    transport.respond("/broken", 500, json!({}));
    let channel = std::sync::Arc::new(MemoryChannel::new());
    let (notifier, mut rx) = Notifier::with_listener();
    let ctx = picart::context::IdentityContext::builder(
        RenderMode::Persistent,
        std::sync::Arc::new(SessionConfig::default()),
        channel,
        transport,
    )
    .notifier(notifier)
    .build();

    ctx.api.call(ApiRequest::post("/articles", json!({}))).await.unwrap();
    let _ = ctx.api.call(ApiRequest::get("/broken")).await;
    assert_eq!(rx.recv().await, Some(Notice::Success("Article published".into())));
    assert!(matches!(rx.recv().await, Some(Notice::Error(_))));
}

#[tokio::test]
async fn user_logout_notifies_server_and_keeps_device() {
    let h = harness(RenderMode::Persistent);
    h.transport.respond("/user/logout", 200, json!({}));
    h.ctx.grant_consent(ConsentCategories::necessary_only()).await.unwrap();
    let device = h.ctx.device.current().unwrap();
    h.ctx.store.set_credential("tok", None).unwrap();

    h.ctx.logout(true).await;

    let logout_req = h.transport.requests().into_iter().find(|r| r.path == "/user/logout").unwrap();
    assert_eq!(logout_req.headers.bearer(), Some("tok"));
    assert_eq!(logout_req.headers.device_id.as_deref(), Some(device.id.as_str()));
    assert_eq!(h.ctx.device.current(), Some(device));
    assert_eq!(h.navigator.visits.lock().as_slice(), ["/".to_string()]);
}

#[tokio::test]
async fn server_logout_failure_does_not_block_teardown() {
    let h = harness(RenderMode::Persistent);
    h.transport.fail("/user/logout");
    h.ctx.store.set_credential("tok", None).unwrap();
    h.ctx.logout(true).await;
    assert!(!h.ctx.store.is_authenticated());
    assert_eq!(h.transport.calls_to("/user/logout"), 1);
    assert!(h.channel.read(keys::AUTH_TOKEN).is_none());
}

#[tokio::test]
async fn profile_decodes_wrapped_payload() {
    let h = harness(RenderMode::Persistent);
    h.transport.respond("/user/profile", 200, profile_body("ada", &["admin"]));
    h.ctx.store.set_credential("tok", None).unwrap();
    let p = h.ctx.api.profile().await.unwrap();
    assert_eq!(p.username.as_deref(), Some("ada"));
    assert!(p.is_admin());
}
