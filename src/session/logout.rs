//! Logout protocol: a single coordinated teardown of session state.
//!
//! The guard moves Idle -> LoggingOut -> Cooldown -> Idle. Any call arriving
//! while a teardown is running joins it. Forced calls (401 responses) are also
//! suppressed during the cooldown, so a burst of them produces one teardown. A
//! user-initiated logout ignores the cooldown. Every teardown step is
//! best-effort.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::guard::is_safe_redirect_path;
use super::store::SessionStore;
use crate::channel::{erase_all, PersistedChannel};
use crate::config::{keys, SessionConfig};
use crate::consent::ConsentLedger;
use crate::error::AppResult;

/// Credential-bearing keys erased on every logout, including legacy names.
pub const CREDENTIAL_KEYS: &[&str] = &[
    keys::AUTH_TOKEN,
    keys::REFRESH_TOKEN,
    keys::LEGACY_TOKEN,
    keys::USER_SESSION,
    keys::USER,
    keys::REMEMBERED_USERNAME,
];

/// Server-side session invalidation. Failures never block local teardown.
pub trait LogoutApi: Send + Sync {
    fn invalidate(&self) -> BoxFuture<'_, AppResult<()>>;
}

/// Moves the user to a landing route once teardown finishes.
pub trait Navigator: Send + Sync {
    fn redirect(&self, path: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardPhase {
    Idle,
    LoggingOut,
    Cooldown,
}

#[derive(Debug, Clone, Copy)]
enum GuardState {
    Idle,
    LoggingOut,
    Cooldown { until: Instant },
}

#[derive(Debug, Clone)]
pub struct LogoutRequest {
    /// Triggered by a rejected credential rather than by the user.
    pub forced: bool,
    pub notify_server: bool,
    pub revoke_consent: bool,
    pub redirect: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// `None` when the server was not asked.
    pub server_notified: Option<bool>,
    pub erase_failures: usize,
    pub consent_revoked: bool,
    pub redirected_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LogoutOutcome {
    Completed(TeardownReport),
    Suppressed,
}

impl LogoutOutcome {
    pub fn is_suppressed(&self) -> bool { matches!(self, LogoutOutcome::Suppressed) }
}

pub struct LogoutProtocol {
    store: Arc<SessionStore>,
    channel: Arc<dyn PersistedChannel>,
    ledger: Arc<ConsentLedger>,
    config: Arc<SessionConfig>,
    api: Option<Arc<dyn LogoutApi>>,
    navigator: Option<Arc<dyn Navigator>>,
    guard: Mutex<GuardState>,
    teardowns: AtomicU64,
}

// Puts the guard into cooldown when the teardown ends, even if the future is dropped.
struct CooldownOnDrop<'a>(&'a LogoutProtocol);

impl Drop for CooldownOnDrop<'_> {
    fn drop(&mut self) {
        let until = Instant::now() + self.0.config.logout_cooldown();
        *self.0.guard.lock() = GuardState::Cooldown { until };
    }
}

impl LogoutProtocol {
    pub fn new(
        store: Arc<SessionStore>,
        channel: Arc<dyn PersistedChannel>,
        ledger: Arc<ConsentLedger>,
        config: Arc<SessionConfig>,
    ) -> Self {
        Self {
            store,
            channel,
            ledger,
            config,
            api: None,
            navigator: None,
            guard: Mutex::new(GuardState::Idle),
            teardowns: AtomicU64::new(0),
        }
    }

    pub fn with_api(mut self, api: Arc<dyn LogoutApi>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Completed teardowns since construction.
    pub fn teardown_count(&self) -> u64 {
        self.teardowns.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> GuardPhase {
        let mut g = self.guard.lock();
        match *g {
            GuardState::Idle => GuardPhase::Idle,
            GuardState::LoggingOut => GuardPhase::LoggingOut,
            GuardState::Cooldown { until } if Instant::now() >= until => {
                *g = GuardState::Idle;
                GuardPhase::Idle
            }
            GuardState::Cooldown { .. } => GuardPhase::Cooldown,
        }
    }

    /// User-initiated logout.
    pub async fn logout(&self, notify_server: bool) -> LogoutOutcome {
        self.run(LogoutRequest {
            forced: false,
            notify_server,
            revoke_consent: false,
            redirect: Some(self.config.logout_redirect.clone()),
        })
        .await
    }

    /// Local-only teardown after the server rejected the credential.
    pub async fn force_logout(&self) -> LogoutOutcome {
        self.run(LogoutRequest {
            forced: true,
            notify_server: false,
            revoke_consent: false,
            redirect: Some(self.config.login_path.clone()),
        })
        .await
    }

    pub async fn run(&self, req: LogoutRequest) -> LogoutOutcome {
        if !self.try_enter(req.forced) {
            debug!(target: "logout", forced = req.forced, "logout suppressed: teardown running or cooling down");
            return LogoutOutcome::Suppressed;
        }
        let _cooldown = CooldownOnDrop(self);
        info!(target: "logout", notify_server = req.notify_server, revoke_consent = req.revoke_consent, "logout started");

        let mut report = TeardownReport::default();

        if req.notify_server {
            if let Some(api) = &self.api {
                let ok = match api.invalidate().await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(target: "logout", code = e.code_str(), "server logout failed; continuing local teardown");
                        false
                    }
                };
                report.server_notified = Some(ok);
            }
        }

        if let Err(e) = self.store.clear() {
            warn!(target: "logout", error = %e, "store clear reported a persistence failure");
            report.erase_failures += 1;
        }
        report.erase_failures += erase_all(self.channel.as_ref(), CREDENTIAL_KEYS).len();

        if req.revoke_consent {
            match self.ledger.revoke() {
                Ok(()) => report.consent_revoked = true,
                Err(e) => warn!(target: "logout", error = %e, "consent revocation incomplete"),
            }
        }

        if let Some(nav) = &self.navigator {
            let target = req.redirect.filter(|p| is_safe_redirect_path(p)).unwrap_or_else(|| "/".to_string());
            nav.redirect(&target);
            report.redirected_to = Some(target);
        }

        self.teardowns.fetch_add(1, Ordering::SeqCst);
        info!(target: "logout", erase_failures = report.erase_failures, "logout complete");
        LogoutOutcome::Completed(report)
    }

    fn try_enter(&self, forced: bool) -> bool {
        let mut g = self.guard.lock();
        let free = match *g {
            GuardState::Idle => true,
            GuardState::LoggingOut => false,
            GuardState::Cooldown { .. } if !forced => true,
            GuardState::Cooldown { until } => Instant::now() >= until,
        };
        if free {
            *g = GuardState::LoggingOut;
        }
        free
    }
}
