use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use super::{ChannelError, PersistedChannel, StoredValue};
use crate::config::CookiePolicy;

/// In-process channel with cookie-style expiry. Also the stand-in for browser
/// storage when the client runs without a state directory.
#[derive(Default)]
pub struct MemoryChannel {
    entries: RwLock<HashMap<String, StoredValue>>,
    reject_writes: AtomicBool,
    reject_erases: AtomicBool,
}

impl MemoryChannel {
    pub fn new() -> Self { Self::default() }

    /// Make subsequent writes fail, as a full or blocked storage backend would.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Make subsequent erases fail and leave the value in place.
    pub fn set_reject_erases(&self, reject: bool) {
        self.reject_erases.store(reject, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.read().values().filter(|e| e.is_live()).count()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl PersistedChannel for MemoryChannel {
    fn read(&self, key: &str) -> Option<String> {
        let map = self.entries.read();
        map.get(key).filter(|e| e.is_live()).map(|e| e.value.clone())
    }

    fn write(&self, key: &str, value: &str, policy: &CookiePolicy) -> Result<(), ChannelError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(ChannelError::WriteRejected { key: key.to_string(), reason: "storage unavailable".into() });
        }
        let entry = StoredValue::new(value, policy);
        let mut map = self.entries.write();
        if entry.is_live() {
            map.insert(key.to_string(), entry);
        } else {
            map.remove(key);
        }
        Ok(())
    }

    fn erase(&self, key: &str) -> Result<(), ChannelError> {
        if self.reject_erases.load(Ordering::SeqCst) {
            return Err(ChannelError::WriteRejected { key: key.to_string(), reason: "storage unavailable".into() });
        }
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().iter().filter(|(_, e)| e.is_live()).map(|(k, _)| k.clone()).collect();
        keys.sort();
        keys
    }
}
