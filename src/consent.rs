//! Consent ledger: which categories of non-essential data collection the user
//! has authorized. The ledger is the only gate for device identity creation.
//!
//! A grant supersedes the previous record as a whole. Revocation erases it and
//! notifies observers synchronously so device identity teardown happens before
//! `revoke` returns.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channel::{self, PersistedChannel};
use crate::config::{keys, SessionConfig};
use crate::error::{AppError, AppResult};

const CONSENT_ACCEPTED: &str = "accepted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentCategory {
    Necessary,
    Functional,
    Analytics,
    Marketing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConsentCategories {
    #[serde(default)]
    pub necessary: bool,
    #[serde(default)]
    pub functional: bool,
    #[serde(default)]
    pub analytics: bool,
    #[serde(default)]
    pub marketing: bool,
}

impl ConsentCategories {
    pub fn all() -> Self {
        Self { necessary: true, functional: true, analytics: true, marketing: true }
    }

    pub fn necessary_only() -> Self {
        Self { necessary: true, ..Default::default() }
    }

    pub fn allows(&self, category: ConsentCategory) -> bool {
        match category {
            ConsentCategory::Necessary => self.necessary,
            ConsentCategory::Functional => self.functional,
            ConsentCategory::Analytics => self.analytics,
            ConsentCategory::Marketing => self.marketing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    #[serde(alias = "settings")]
    pub categories: ConsentCategories,
    pub version: String,
    #[serde(alias = "timestamp")]
    pub granted_at: DateTime<Utc>,
    /// Audit only (typically the user agent).
    #[serde(default, alias = "userAgent", skip_serializing_if = "Option::is_none")]
    pub client_hint: Option<String>,
}

impl ConsentRecord {
    pub fn necessary(&self) -> bool { self.categories.necessary }
}

/// Notified after every consent transition, outside the ledger's lock.
pub trait ConsentObserver: Send + Sync {
    fn on_consent_changed(&self, previous: Option<&ConsentRecord>, current: Option<&ConsentRecord>);
}

pub struct ConsentLedger {
    channel: Arc<dyn PersistedChannel>,
    config: Arc<SessionConfig>,
    client_hint: Option<String>,
    current: RwLock<Option<ConsentRecord>>,
    observers: RwLock<Vec<Weak<dyn ConsentObserver>>>,
}

impl ConsentLedger {
    pub fn new(channel: Arc<dyn PersistedChannel>, config: Arc<SessionConfig>) -> Self {
        Self { channel, config, client_hint: None, current: RwLock::new(None), observers: RwLock::new(Vec::new()) }
    }

    pub fn with_client_hint(mut self, hint: Option<String>) -> Self {
        self.client_hint = hint;
        self
    }

    /// Restore the record persisted by an earlier context. Without the consent
    /// flag nothing is restored, even if stray settings are present.
    pub fn load(&self) -> Option<ConsentRecord> {
        let ch = self.channel.as_ref();
        if ch.read(keys::CONSENT).is_none() {
            *self.current.write() = None;
            return None;
        }
        let settings: Option<ConsentCategories> = channel::read_json(ch, keys::CONSENT_SETTINGS);
        let audit: Option<ConsentRecord> = channel::read_json(ch, keys::CONSENT_RECORD);
        let record = match (settings, audit) {
            (Some(categories), Some(mut rec)) => {
                // Settings are authoritative; the audit record only supplies metadata.
                rec.categories = categories;
                Some(rec)
            }
            (Some(categories), None) => Some(ConsentRecord {
                categories,
                version: self.config.consent_version.clone(),
                granted_at: Utc::now(),
                client_hint: None,
            }),
            (None, Some(rec)) => Some(rec),
            (None, None) => None,
        };
        debug!(target: "consent", restored = record.is_some(), "consent loaded from channel");
        *self.current.write() = record.clone();
        record
    }

    pub fn current(&self) -> Option<ConsentRecord> {
        self.current.read().clone()
    }

    pub fn necessary_granted(&self) -> bool {
        self.current.read().as_ref().map(|r| r.necessary()).unwrap_or(false)
    }

    pub fn is_allowed(&self, category: ConsentCategory) -> bool {
        self.current.read().as_ref().map(|r| r.categories.allows(category)).unwrap_or(false)
    }

    /// Register an observer. Only a weak reference is kept.
    pub fn subscribe(&self, observer: Weak<dyn ConsentObserver>) {
        self.observers.write().push(observer);
    }

    /// Replace any prior record. `necessary` is always recorded as granted.
    ///
    /// The new record is visible in memory even when persisting it fails; the
    /// failure is returned to the caller.
    pub fn grant(&self, categories: ConsentCategories) -> AppResult<ConsentRecord> {
        let categories = ConsentCategories { necessary: true, ..categories };
        let record = ConsentRecord {
            categories,
            version: self.config.consent_version.clone(),
            granted_at: Utc::now(),
            client_hint: self.client_hint.clone(),
        };
        let previous = self.current.write().replace(record.clone());
        info!(
            target: "consent",
            functional = categories.functional,
            analytics = categories.analytics,
            marketing = categories.marketing,
            "consent granted"
        );

        let persisted = self.persist(&record);
        self.notify(previous.as_ref(), Some(&record));
        persisted.map(|_| record)
    }

    pub fn accept_all(&self) -> AppResult<ConsentRecord> { self.grant(ConsentCategories::all()) }

    pub fn reject_all(&self) -> AppResult<ConsentRecord> { self.grant(ConsentCategories::necessary_only()) }

    /// Remove the record. Observers see the transition before this returns.
    pub fn revoke(&self) -> AppResult<()> {
        let previous = self.current.write().take();
        let failed = channel::erase_all(
            self.channel.as_ref(),
            &[keys::CONSENT, keys::CONSENT_SETTINGS, keys::CONSENT_RECORD],
        );
        info!(target: "consent", had_record = previous.is_some(), "consent revoked");
        self.notify(previous.as_ref(), None);
        match failed.into_iter().next() {
            Some((_, e)) => Err(e.into()),
            None => Ok(()),
        }
    }

    pub fn reset(&self) -> AppResult<()> { self.revoke() }

    fn persist(&self, record: &ConsentRecord) -> AppResult<()> {
        let ch = self.channel.as_ref();
        let cfg = &self.config;
        let mut first_err: Option<AppError> = None;
        let mut keep = |r: Result<(), channel::ChannelError>, key: &str| {
            if let Err(e) = r {
                warn!(target: "consent", key, error = %e, "failed to persist consent");
                if first_err.is_none() { first_err = Some(e.into()); }
            }
        };
        keep(ch.write(keys::CONSENT, CONSENT_ACCEPTED, &cfg.policy_for(keys::CONSENT)), keys::CONSENT);
        keep(channel::write_json(ch, keys::CONSENT_SETTINGS, &record.categories, &cfg.policy_for(keys::CONSENT_SETTINGS)), keys::CONSENT_SETTINGS);
        keep(channel::write_json(ch, keys::CONSENT_RECORD, record, &cfg.policy_for(keys::CONSENT_RECORD)), keys::CONSENT_RECORD);
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn notify(&self, previous: Option<&ConsentRecord>, current: Option<&ConsentRecord>) {
        let live: Vec<Arc<dyn ConsentObserver>> = {
            let mut obs = self.observers.write();
            obs.retain(|w| w.strong_count() > 0);
            obs.iter().filter_map(|w| w.upgrade()).collect()
        };
        for o in live {
            o.on_consent_changed(previous, current);
        }
    }
}
