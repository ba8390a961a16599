//! Session bootstrap: turns whatever the context carries (in-memory store,
//! persisted credential) into a loaded session before the first render.
//!
//! The render pass awaits `bootstrap` before producing its response. The
//! persistent client calls `bootstrap_with_retry`, which waits for a credential
//! that may be adopted after the first attempt.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::store::SessionStore;
use crate::config::RetryPolicy;
use crate::error::AppResult;
use crate::identity::UserProfile;

/// Fetches the authenticated user's profile. Implemented by the API client.
pub trait ProfileSource: Send + Sync {
    fn fetch_profile(&self) -> BoxFuture<'_, AppResult<UserProfile>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Per-request render pass with a request-scoped cookie channel.
    Stateless,
    /// Long-lived client whose store outlives navigation.
    Persistent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BootstrapOutcome {
    /// No credential in memory or in the channel.
    Anonymous,
    /// Profile already cached for the current credential; nothing fetched.
    AlreadyLoaded,
    ProfileLoaded,
    /// The fetch for this credential already failed; not retried in this pass.
    AlreadyAttempted,
    /// Profile fetch failed. The profile is cleared; the credential is left to
    /// the interceptor pipeline, which tears it down on 401.
    Stale { code: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub outcome: BootstrapOutcome,
    pub authenticated: bool,
    pub adopted: bool,
    /// Profile fetches issued by this bootstrapper so far.
    pub fetch_attempts: u32,
}

#[derive(Debug, Default)]
struct BootstrapState {
    // Credential the last fetch was issued for.
    fetched_for: Option<String>,
    // Credential observed on the previous pass.
    seen: Option<String>,
    fetches: u32,
}

pub struct SessionBootstrapper {
    store: Arc<SessionStore>,
    source: Arc<dyn ProfileSource>,
    mode: RenderMode,
    retry: RetryPolicy,
    state: Mutex<BootstrapState>,
}

impl SessionBootstrapper {
    pub fn new(store: Arc<SessionStore>, source: Arc<dyn ProfileSource>, mode: RenderMode, retry: RetryPolicy) -> Self {
        Self { store, source, mode, retry, state: Mutex::new(BootstrapState::default()) }
    }

    pub fn mode(&self) -> RenderMode { self.mode }

    pub async fn fetch_attempts(&self) -> u32 {
        self.state.lock().await.fetches
    }

    /// One bootstrap pass. Concurrent callers are serialized, so a credential
    /// never triggers more than one profile fetch.
    pub async fn bootstrap(&self) -> BootstrapReport {
        let mut st = self.state.lock().await;
        let adopted = self.store.adopt_persisted();

        let Some(token) = self.store.token() else {
            st.fetched_for = None;
            st.seen = None;
            return self.report(&st, BootstrapOutcome::Anonymous, adopted);
        };

        let unchanged = st.seen.as_deref().map_or(true, |t| t == token);
        st.seen = Some(token.clone());
        if self.store.profile().is_some() && unchanged {
            return self.report(&st, BootstrapOutcome::AlreadyLoaded, adopted);
        }
        if st.fetched_for.as_deref() == Some(token.as_str()) && self.store.profile().is_none() {
            return self.report(&st, BootstrapOutcome::AlreadyAttempted, adopted);
        }

        st.fetches += 1;
        st.fetched_for = Some(token.clone());
        debug!(target: "bootstrap", mode = ?self.mode, attempt = st.fetches, "fetching profile");

        let outcome = match self.source.fetch_profile().await {
            Ok(profile) => {
                // A logout or re-login during the fetch makes this profile stale.
                if self.store.token().as_deref() == Some(token.as_str()) {
                    info!(target: "bootstrap", user = profile.display_name().unwrap_or("-"), "profile loaded");
                    self.store.set_profile(Some(profile));
                    BootstrapOutcome::ProfileLoaded
                } else {
                    BootstrapOutcome::Stale { code: "credential_changed".to_string() }
                }
            }
            Err(e) => {
                warn!(target: "bootstrap", code = e.code_str(), "profile fetch failed; clearing profile");
                self.store.set_profile(None);
                BootstrapOutcome::Stale { code: e.code_str().to_string() }
            }
        };
        self.report(&st, outcome, adopted)
    }

    /// Bootstrap for a persistent client. An anonymous result is retried a
    /// bounded number of times, waking early when a credential appears.
    pub async fn bootstrap_with_retry(&self) -> BootstrapReport {
        let attempts = self.retry.max_attempts.max(1);
        let mut auth = self.store.subscribe();
        let mut report = self.bootstrap().await;
        for attempt in 1..attempts {
            if report.outcome != BootstrapOutcome::Anonymous {
                break;
            }
            let wait = self.retry.backoff_for(attempt);
            debug!(target: "bootstrap", attempt, wait_ms = wait.as_millis() as u64, "no credential yet; waiting");
            let _ = tokio::time::timeout(wait, auth.changed()).await;
            report = self.bootstrap().await;
        }
        report
    }

    /// Run the persistent bootstrap in the background after the first paint.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<BootstrapReport> {
        tokio::spawn(async move { self.bootstrap_with_retry().await })
    }

    fn report(&self, st: &BootstrapState, outcome: BootstrapOutcome, adopted: bool) -> BootstrapReport {
        BootstrapReport { outcome, authenticated: self.store.is_authenticated(), adopted, fetch_attempts: st.fetches }
    }
}
