use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::fingerprint::Fingerprinter;
use crate::channel::PersistedChannel;
use crate::config::{keys, SessionConfig};
use crate::consent::{ConsentLedger, ConsentObserver, ConsentRecord};

pub const FALLBACK_PREFIX: &str = "device-";
const FALLBACK_LEN: usize = 8;
const FALLBACK_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceOrigin {
    Fingerprint,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub id: String,
    pub origin: DeviceOrigin,
}

impl DeviceIdentity {
    /// Rebuild from a persisted id; the origin is recovered from the id shape.
    pub fn from_persisted(id: &str) -> Self {
        let origin = if id.starts_with(FALLBACK_PREFIX) { DeviceOrigin::Fallback } else { DeviceOrigin::Fingerprint };
        Self { id: id.to_string(), origin }
    }

    /// Leading characters only, for logs.
    pub fn short(&self) -> &str {
        let end = self.id.char_indices().nth(12).map(|(i, _)| i).unwrap_or(self.id.len());
        &self.id[..end]
    }
}

/// `device-` followed by 8 lowercase alphanumerics. Cannot fail.
pub fn fallback_device_id() -> String {
    let mut rng = rand::thread_rng();
    let mut id = String::with_capacity(FALLBACK_PREFIX.len() + FALLBACK_LEN);
    id.push_str(FALLBACK_PREFIX);
    for _ in 0..FALLBACK_LEN {
        let idx = rng.gen_range(0..FALLBACK_ALPHABET.len());
        id.push(FALLBACK_ALPHABET[idx] as char);
    }
    id
}

/// Issues the per-browser device identifier.
///
/// Invariants:
/// - nothing is written to the channel unless the ledger has `necessary` consent;
/// - once issued, the identifier never changes while that consent holds;
/// - concurrent `resolve` calls share one resolution.
pub struct DeviceIdentityResolver {
    ledger: Arc<ConsentLedger>,
    channel: Arc<dyn PersistedChannel>,
    config: Arc<SessionConfig>,
    fingerprinter: Arc<dyn Fingerprinter>,
    resolving: Mutex<()>,
    slot: watch::Sender<Option<DeviceIdentity>>,
    // Bumped on every teardown so an in-flight resolution can notice it lost.
    epoch: AtomicU64,
    issued: AtomicU64,
}

impl DeviceIdentityResolver {
    /// Build the resolver and register it with the ledger for teardown.
    pub fn new(
        ledger: Arc<ConsentLedger>,
        channel: Arc<dyn PersistedChannel>,
        config: Arc<SessionConfig>,
        fingerprinter: Arc<dyn Fingerprinter>,
    ) -> Arc<Self> {
        let (slot, _) = watch::channel(None);
        let resolver = Arc::new(Self {
            ledger: ledger.clone(),
            channel,
            config,
            fingerprinter,
            resolving: Mutex::new(()),
            slot,
            epoch: AtomicU64::new(0),
            issued: AtomicU64::new(0),
        });
        let observer: Arc<dyn ConsentObserver> = resolver.clone();
        ledger.subscribe(Arc::downgrade(&observer));
        resolver
    }

    /// Watch the published identity. `None` means no identity is available.
    pub fn subscribe(&self) -> watch::Receiver<Option<DeviceIdentity>> {
        self.slot.subscribe()
    }

    /// Fresh identifiers generated by this resolver (persisted reuse excluded).
    pub fn issued_count(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    /// Read-only view used on the request path: never generates, and yields
    /// nothing without consent.
    pub fn current(&self) -> Option<DeviceIdentity> {
        if !self.ledger.necessary_granted() {
            return None;
        }
        let cached = self.slot.borrow().clone();
        cached.or_else(|| self.persisted())
    }

    /// Sync the slot with what the channel already holds. Without consent a
    /// stray persisted identifier is erased instead.
    pub fn adopt_existing(&self) -> Option<DeviceIdentity> {
        if !self.ledger.necessary_granted() {
            if self.channel.contains(keys::DEVICE_ID) {
                debug!(target: "device", "erasing device id persisted without consent");
                self.teardown();
            }
            return None;
        }
        let found = self.persisted();
        if let Some(id) = &found {
            self.publish(Some(id.clone()));
        }
        found
    }

    /// Return the device identity, creating and persisting it on first use.
    /// Returns `None` without touching the channel when consent is missing.
    pub async fn resolve(&self) -> Option<DeviceIdentity> {
        if !self.ledger.necessary_granted() {
            debug!(target: "device", "resolve skipped: necessary consent not granted");
            return None;
        }
        if let Some(id) = self.persisted() {
            self.publish(Some(id.clone()));
            return Some(id);
        }

        let _inflight = self.resolving.lock().await;
        // Another caller may have finished while we waited.
        if !self.ledger.necessary_granted() {
            return None;
        }
        if let Some(id) = self.persisted() {
            self.publish(Some(id.clone()));
            return Some(id);
        }
        let epoch = self.epoch.load(Ordering::SeqCst);

        // Persisted value vanished while we still hold one in memory: re-persist it.
        let cached = self.slot.borrow().clone();
        let (identity, fresh) = match cached {
            Some(id) => (id, false),
            None => (self.generate().await, true),
        };

        if !self.ledger.necessary_granted() || self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(target: "device", "consent withdrawn during resolution; discarding identity");
            return None;
        }
        if let Err(e) = self.channel.write(keys::DEVICE_ID, &identity.id, &self.config.policy_for(keys::DEVICE_ID)) {
            warn!(target: "device", error = %e, "failed to persist device id; keeping it in memory");
        }
        // Epoch check and publish share the slot lock that teardown also takes.
        let mut lost = false;
        self.slot.send_if_modified(|cur| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                lost = true;
                return false;
            }
            if cur.as_ref() == Some(&identity) {
                false
            } else {
                *cur = Some(identity.clone());
                true
            }
        });
        if lost {
            let _ = self.channel.erase(keys::DEVICE_ID);
            return None;
        }
        if fresh {
            self.issued.fetch_add(1, Ordering::SeqCst);
            info!(target: "device", origin = ?identity.origin, id = identity.short(), "device identity issued");
        }
        Some(identity)
    }

    /// Erase the persisted identifier and clear the published slot.
    pub fn teardown(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.channel.erase(keys::DEVICE_ID) {
            warn!(target: "device", error = %e, "failed to erase device id");
        }
        self.publish(None);
        info!(target: "device", "device identity torn down");
    }

    fn persisted(&self) -> Option<DeviceIdentity> {
        self.channel
            .read(keys::DEVICE_ID)
            .filter(|v| !v.trim().is_empty())
            .map(|v| DeviceIdentity::from_persisted(v.trim()))
    }

    fn publish(&self, value: Option<DeviceIdentity>) {
        self.slot.send_if_modified(|cur| {
            if *cur == value {
                false
            } else {
                *cur = value;
                true
            }
        });
    }

    async fn generate(&self) -> DeviceIdentity {
        let timeout = self.config.fingerprint_timeout();
        match tokio::time::timeout(timeout, self.fingerprinter.fingerprint()).await {
            Ok(Ok(id)) if !id.trim().is_empty() => {
                return DeviceIdentity { id: id.trim().to_string(), origin: DeviceOrigin::Fingerprint };
            }
            Ok(Ok(_)) => warn!(target: "device", "fingerprint was empty, using fallback"),
            Ok(Err(e)) => warn!(target: "device", error = %e, "fingerprint failed, using fallback"),
            Err(_) => warn!(target: "device", timeout_ms = timeout.as_millis() as u64, "fingerprint timed out, using fallback"),
        }
        DeviceIdentity { id: fallback_device_id(), origin: DeviceOrigin::Fallback }
    }
}

impl ConsentObserver for DeviceIdentityResolver {
    fn on_consent_changed(&self, previous: Option<&ConsentRecord>, current: Option<&ConsentRecord>) {
        let had = previous.map(|r| r.necessary()).unwrap_or(false);
        let has = current.map(|r| r.necessary()).unwrap_or(false);
        let published = self.slot.borrow().is_some();
        if !has && (had || published || self.channel.contains(keys::DEVICE_ID)) {
            self.teardown();
        }
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod device_tests;
