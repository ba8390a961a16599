//! Persisted identity channels.
//! The core never branches on execution context: it reads and writes through
//! `PersistedChannel`, and the context decides which backend sits behind it.

mod cookie;
mod memory;
mod file;
mod request;

pub use cookie::{format_clear_cookie, format_set_cookie, parse_cookie_header};
pub use memory::MemoryChannel;
pub use file::FileChannel;
pub use request::RequestCookieChannel;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::CookiePolicy;
use crate::error::AppError;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("write rejected for '{key}': {reason}")]
    WriteRejected { key: String, reason: String },
    #[error("channel io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("channel encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl From<ChannelError> for AppError {
    fn from(err: ChannelError) -> Self {
        let code = match &err {
            ChannelError::WriteRejected { .. } => "channel_write_rejected",
            ChannelError::Io(_) => "channel_io",
            ChannelError::Encoding(_) => "channel_encoding",
        };
        AppError::persistence(code.to_string(), err.to_string())
    }
}

/// Key/value store that outlives a single in-memory store instance.
/// Reads are infallible: an unreadable value is the same as an absent one.
pub trait PersistedChannel: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, key: &str, value: &str, policy: &CookiePolicy) -> Result<(), ChannelError>;
    fn erase(&self, key: &str) -> Result<(), ChannelError>;
    /// Keys currently holding a live value.
    fn keys(&self) -> Vec<String>;

    fn contains(&self, key: &str) -> bool { self.read(key).is_some() }
}

pub fn read_json<T: DeserializeOwned>(channel: &dyn PersistedChannel, key: &str) -> Option<T> {
    let raw = channel.read(key)?;
    match serde_json::from_str::<T>(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!(target: "channel", key, error = %e, "ignoring undecodable persisted value");
            None
        }
    }
}

pub fn write_json<T: Serialize>(
    channel: &dyn PersistedChannel,
    key: &str,
    value: &T,
    policy: &CookiePolicy,
) -> Result<(), ChannelError> {
    let raw = serde_json::to_string(value)?;
    channel.write(key, &raw, policy)
}

/// Erase every key in `keys`, continuing past failures. Returns the failures.
pub fn erase_all(channel: &dyn PersistedChannel, keys: &[&str]) -> Vec<(String, ChannelError)> {
    let mut failed = Vec::new();
    for k in keys {
        if let Err(e) = channel.erase(k) {
            tracing::warn!(target: "channel", key = *k, error = %e, "erase failed");
            failed.push((k.to_string(), e));
        }
    }
    failed
}

/// Expiring value shared by the in-process and file backends.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct StoredValue {
    pub value: String,
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl StoredValue {
    pub fn new(value: &str, policy: &CookiePolicy) -> Self {
        // A max-age too large to represent means no expiry.
        let expires_at = i64::try_from(policy.max_age_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|ttl| chrono::Utc::now().checked_add_signed(ttl));
        Self { value: value.to_string(), expires_at }
    }

    pub fn is_live(&self) -> bool {
        match self.expires_at {
            Some(t) => t > chrono::Utc::now(),
            None => true,
        }
    }
}
