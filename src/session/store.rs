use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::channel::PersistedChannel;
use crate::config::{keys, SessionConfig};
use crate::error::{AppError, AppResult};
use crate::identity::UserProfile;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredential {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl SessionCredential {
    pub fn is_authenticated(&self) -> bool { self.access_token.is_some() }
}

#[derive(Debug, Default)]
struct SessionState {
    credential: SessionCredential,
    profile: Option<UserProfile>,
    remembered_username: Option<String>,
    // Set by `clear`; the persisted channel may still hold the dropped token.
    signed_out: bool,
}

/// Owner of the session credential and profile snapshot for one execution
/// context. The in-memory state is authoritative; every credential change is
/// mirrored to the persisted channel with a bounded lifetime.
pub struct SessionStore {
    channel: Arc<dyn PersistedChannel>,
    config: Arc<SessionConfig>,
    state: RwLock<SessionState>,
    authenticated: watch::Sender<bool>,
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

impl SessionStore {
    pub fn new(channel: Arc<dyn PersistedChannel>, config: Arc<SessionConfig>) -> Self {
        let (authenticated, _) = watch::channel(false);
        Self { channel, config, state: RwLock::new(SessionState::default()), authenticated }
    }

    /// Observe authentication flips (credential set or cleared).
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.authenticated.subscribe()
    }

    /// The only operation that makes the store authenticated.
    pub fn set_credential(&self, access: &str, refresh: Option<&str>) -> AppResult<()> {
        let Some(access) = non_empty(Some(access)) else {
            return Err(AppError::user("empty_token", "access token must not be empty"));
        };
        let refresh = non_empty(refresh);
        {
            let mut st = self.state.write();
            st.signed_out = false;
            st.credential.access_token = Some(access.clone());
            if refresh.is_some() {
                st.credential.refresh_token = refresh.clone();
            }
        }
        self.publish();
        debug!(target: "session", has_refresh = refresh.is_some(), "credential set");

        let mut result = self.channel.write(keys::AUTH_TOKEN, &access, &self.config.policy_for(keys::AUTH_TOKEN));
        if let Some(r) = &refresh {
            let r2 = self.channel.write(keys::REFRESH_TOKEN, r, &self.config.policy_for(keys::REFRESH_TOKEN));
            if result.is_ok() { result = r2; }
        }
        result.map_err(|e| {
            warn!(target: "session", error = %e, "credential mirror write failed");
            e.into()
        })
    }

    /// Replace or drop the profile snapshot. Never changes authentication.
    pub fn set_profile(&self, profile: Option<UserProfile>) {
        let mut st = self.state.write();
        if profile.is_none() && st.profile.is_some() {
            debug!(target: "session", "profile cleared");
        }
        st.profile = profile;
    }

    /// Zero credential and profile together, including the credential mirror.
    pub fn clear(&self) -> AppResult<()> {
        {
            let mut st = self.state.write();
            st.credential = SessionCredential::default();
            st.profile = None;
            st.remembered_username = None;
            st.signed_out = true;
        }
        self.publish();
        info!(target: "session", "session cleared");
        let a = self.channel.erase(keys::AUTH_TOKEN);
        let b = self.channel.erase(keys::REFRESH_TOKEN);
        a.and(b).map_err(AppError::from)
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().credential.is_authenticated()
    }

    pub fn token(&self) -> Option<String> {
        self.state.read().credential.access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.state.read().credential.refresh_token.clone()
    }

    pub fn credential(&self) -> SessionCredential {
        self.state.read().credential.clone()
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.state.read().profile.clone()
    }

    pub fn is_admin(&self) -> bool {
        self.state.read().profile.as_ref().map(|p| p.is_admin()).unwrap_or(false)
    }

    /// Token as currently held by the persisted channel.
    pub fn persisted_token(&self) -> Option<String> {
        non_empty(self.channel.read(keys::AUTH_TOKEN).as_deref())
    }

    /// True once `clear` ran and no credential was set since.
    pub fn is_signed_out(&self) -> bool {
        self.state.read().signed_out
    }

    /// Persisted token that may still be adopted into an empty store. Never
    /// returns a token that `clear` dropped, even if erasing it failed.
    pub fn adoptable_token(&self) -> Option<String> {
        if self.is_authenticated() || self.is_signed_out() {
            return None;
        }
        self.persisted_token()
    }

    /// Adopt the persisted credential when the in-memory store is empty.
    /// Returns true when a credential was adopted.
    pub fn adopt_persisted(&self) -> bool {
        let Some(access) = self.adoptable_token() else { return false; };
        let refresh = non_empty(self.channel.read(keys::REFRESH_TOKEN).as_deref());
        {
            let mut st = self.state.write();
            // Re-check under the lock; a concurrent set_credential or clear wins.
            if st.credential.is_authenticated() || st.signed_out {
                return false;
            }
            st.credential = SessionCredential { access_token: Some(access), refresh_token: refresh };
        }
        self.publish();
        debug!(target: "session", "credential adopted from persisted channel");
        true
    }

    pub fn remember_username(&self, username: &str) -> AppResult<()> {
        self.state.write().remembered_username = non_empty(Some(username));
        self.channel
            .write(keys::REMEMBERED_USERNAME, username, &self.config.policy_for(keys::REMEMBERED_USERNAME))
            .map_err(AppError::from)
    }

    pub fn remembered_username(&self) -> Option<String> {
        let cached = self.state.read().remembered_username.clone();
        cached.or_else(|| non_empty(self.channel.read(keys::REMEMBERED_USERNAME).as_deref()))
    }

    fn publish(&self) {
        let now = self.is_authenticated();
        self.authenticated.send_if_modified(|cur| {
            if *cur == now { false } else { *cur = now; true }
        });
    }
}
