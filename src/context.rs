//! Identity context: one wired set of ledger, resolver, store, pipeline and
//! logout protocol per execution context. A render pass builds one per request
//! over its cookie channel; the persistent client builds one for its lifetime.

use std::sync::Arc;

use axum::http::HeaderMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::api::{ApiClient, IdentityHeaders, InterceptorPipeline, Notifier, RemoteLogout, Transport};
use crate::channel::{PersistedChannel, RequestCookieChannel};
use crate::config::SessionConfig;
use crate::consent::{ConsentCategories, ConsentLedger, ConsentRecord};
use crate::error::AppResult;
use crate::identity::{DeviceIdentity, DeviceIdentityResolver, EnvironmentFingerprinter, EnvironmentSignals, Fingerprinter, UserProfile};
use crate::session::{
    BootstrapReport, LogoutOutcome, LogoutProtocol, Navigator, RenderMode, RouteDecision, RouteGuard, SessionBootstrapper,
    SessionStore,
};

/// What collaborators (layout, route guard, status endpoint) get to see.
#[derive(Debug, Clone, Serialize)]
pub struct IdentitySnapshot {
    pub authenticated: bool,
    pub is_admin: bool,
    pub profile: Option<UserProfile>,
    pub device: Option<DeviceIdentity>,
    pub consent: Option<ConsentRecord>,
    pub remembered_username: Option<String>,
}

pub struct IdentityContext {
    pub mode: RenderMode,
    pub config: Arc<SessionConfig>,
    pub channel: Arc<dyn PersistedChannel>,
    pub ledger: Arc<ConsentLedger>,
    pub device: Arc<DeviceIdentityResolver>,
    pub store: Arc<SessionStore>,
    pub logout: Arc<LogoutProtocol>,
    pub api: Arc<ApiClient>,
    pub bootstrapper: Arc<SessionBootstrapper>,
    pub guard: RouteGuard,
}

pub struct ContextBuilder {
    mode: RenderMode,
    config: Arc<SessionConfig>,
    channel: Arc<dyn PersistedChannel>,
    transport: Arc<dyn Transport>,
    fingerprinter: Option<Arc<dyn Fingerprinter>>,
    notifier: Notifier,
    navigator: Option<Arc<dyn Navigator>>,
    client_hint: Option<String>,
}

impl ContextBuilder {
    pub fn fingerprinter(mut self, fp: Arc<dyn Fingerprinter>) -> Self {
        self.fingerprinter = Some(fp);
        self
    }

    pub fn notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn client_hint(mut self, hint: Option<String>) -> Self {
        self.client_hint = hint;
        self
    }

    pub fn build(self) -> IdentityContext {
        let ContextBuilder { mode, config, channel, transport, fingerprinter, notifier, navigator, client_hint } = self;
        let fingerprinter = fingerprinter
            .unwrap_or_else(|| Arc::new(EnvironmentFingerprinter::new(EnvironmentSignals::from_process())) as Arc<dyn Fingerprinter>);

        let ledger = Arc::new(ConsentLedger::new(channel.clone(), config.clone()).with_client_hint(client_hint));
        ledger.load();
        let device = DeviceIdentityResolver::new(ledger.clone(), channel.clone(), config.clone(), fingerprinter);
        device.adopt_existing();

        let store = Arc::new(SessionStore::new(channel.clone(), config.clone()));
        let identity = IdentityHeaders::new(device.clone(), store.clone())
            .with_persisted_fallback(mode == RenderMode::Stateless);

        let remote = Arc::new(RemoteLogout::new(transport.clone(), identity.clone(), config.clone()));
        let mut logout = LogoutProtocol::new(store.clone(), channel.clone(), ledger.clone(), config.clone()).with_api(remote);
        if let Some(nav) = navigator {
            logout = logout.with_navigator(nav);
        }
        let logout = Arc::new(logout);

        let pipeline = Arc::new(InterceptorPipeline::new(transport, identity, logout.clone(), notifier));
        let api = Arc::new(ApiClient::new(pipeline, config.clone()));
        let bootstrapper =
            Arc::new(SessionBootstrapper::new(store.clone(), api.clone(), mode, config.bootstrap_retry.clone()));
        let guard = RouteGuard::new(&config.login_path);

        debug!(target: "session", mode = ?mode, consent = ledger.necessary_granted(), "identity context ready");
        IdentityContext { mode, config, channel, ledger, device, store, logout, api, bootstrapper, guard }
    }
}

impl IdentityContext {
    pub fn builder(
        mode: RenderMode,
        config: Arc<SessionConfig>,
        channel: Arc<dyn PersistedChannel>,
        transport: Arc<dyn Transport>,
    ) -> ContextBuilder {
        ContextBuilder {
            mode,
            config,
            channel,
            transport,
            fingerprinter: None,
            notifier: Notifier::new(),
            navigator: None,
            client_hint: None,
        }
    }

    /// Context for one render pass over the inbound request's cookies. The
    /// returned channel collects the `Set-Cookie` values for the response.
    pub fn for_render_pass(
        headers: &HeaderMap,
        config: Arc<SessionConfig>,
        transport: Arc<dyn Transport>,
    ) -> (Self, Arc<RequestCookieChannel>) {
        let channel = Arc::new(RequestCookieChannel::from_headers(headers));
        let hint = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let ctx = Self::builder(RenderMode::Stateless, config, channel.clone(), transport)
            .fingerprinter(Arc::new(EnvironmentFingerprinter::new(EnvironmentSignals::from_headers(headers))))
            .client_hint(hint)
            .build();
        (ctx, channel)
    }

    /// Record a consent decision and issue the device identity it allows.
    pub async fn grant_consent(&self, categories: ConsentCategories) -> AppResult<ConsentRecord> {
        let granted = self.ledger.grant(categories);
        if self.ledger.necessary_granted() {
            self.device.resolve().await;
        }
        granted
    }

    pub fn revoke_consent(&self) -> AppResult<()> {
        self.ledger.revoke()
    }

    /// Install a freshly issued credential and load its profile.
    pub async fn sign_in(&self, access: &str, refresh: Option<&str>, remember: Option<&str>) -> AppResult<BootstrapReport> {
        self.store.set_credential(access, refresh)?;
        if let Some(name) = remember {
            self.store.remember_username(name)?;
        }
        info!(target: "session", "signed in");
        Ok(self.bootstrap().await)
    }

    /// Bootstrap the way this context's mode requires.
    pub async fn bootstrap(&self) -> BootstrapReport {
        match self.mode {
            RenderMode::Stateless => self.bootstrapper.bootstrap().await,
            RenderMode::Persistent => self.bootstrapper.bootstrap_with_retry().await,
        }
    }

    pub async fn logout(&self, notify_server: bool) -> LogoutOutcome {
        // The server call must carry the credential even if no bootstrap ran.
        self.store.adopt_persisted();
        self.logout.logout(notify_server).await
    }

    pub fn route(&self, full_path: &str, requires_auth: bool) -> RouteDecision {
        self.guard.decide(&self.store, full_path, requires_auth)
    }

    pub fn snapshot(&self) -> IdentitySnapshot {
        IdentitySnapshot {
            authenticated: self.store.is_authenticated(),
            is_admin: self.store.is_admin(),
            profile: self.store.profile(),
            device: self.device.current(),
            consent: self.ledger.current(),
            remembered_username: self.store.remembered_username(),
        }
    }
}
