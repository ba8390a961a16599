use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::{ChannelError, PersistedChannel, StoredValue};
use crate::config::CookiePolicy;

/// Durable channel for the persistent client context: a JSON document of
/// `{ key: { value, expires_at } }` rewritten atomically on every mutation.
pub struct FileChannel {
    path: PathBuf,
    entries: Mutex<HashMap<String, StoredValue>>,
}

impl FileChannel {
    /// Open (or lazily create) the channel file. A corrupt file is treated as empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChannelError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<HashMap<String, StoredValue>>(&text) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(target: "channel", path = %path.display(), error = %e, "discarding unreadable channel file");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        let live: HashMap<String, StoredValue> = entries.into_iter().filter(|(_, v)| v.is_live()).collect();
        Ok(Self { path, entries: Mutex::new(live) })
    }

    pub fn path(&self) -> &Path { &self.path }

    fn flush(&self, map: &HashMap<String, StoredValue>) -> Result<(), ChannelError> {
        let text = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut f = std::fs::File::create(&tmp)?;
            f.write_all(text.as_bytes())?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PersistedChannel for FileChannel {
    fn read(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).filter(|e| e.is_live()).map(|e| e.value.clone())
    }

    fn write(&self, key: &str, value: &str, policy: &CookiePolicy) -> Result<(), ChannelError> {
        let mut map = self.entries.lock();
        let mut next = map.clone();
        let entry = StoredValue::new(value, policy);
        if entry.is_live() {
            next.insert(key.to_string(), entry);
        } else {
            next.remove(key);
        }
        // Only publish the new state once it is on disk.
        self.flush(&next)?;
        *map = next;
        Ok(())
    }

    // Unlike `write`, the entry leaves memory even when the flush fails.
    fn erase(&self, key: &str) -> Result<(), ChannelError> {
        let mut map = self.entries.lock();
        if map.remove(key).is_none() { return Ok(()); }
        self.flush(&map)
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().iter().filter(|(_, e)| e.is_live()).map(|(k, _)| k.clone()).collect();
        keys.sort();
        keys
    }
}
