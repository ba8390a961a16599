use std::collections::{BTreeMap, HashMap};

use axum::http::HeaderMap;
use parking_lot::{Mutex, RwLock};

use super::cookie::{format_clear_cookie, format_set_cookie, parse_cookie_header};
use super::{ChannelError, PersistedChannel};
use crate::config::{keys, CookiePolicy, SessionConfig};

/// Channel for one stateless render pass. Reads come from the inbound `Cookie`
/// header; mutations become outbound `Set-Cookie` values and are visible to
/// later reads within the same pass.
pub struct RequestCookieChannel {
    inbound: HashMap<String, String>,
    overlay: RwLock<HashMap<String, Option<String>>>,
    outbound: Mutex<BTreeMap<String, String>>,
}

impl RequestCookieChannel {
    pub fn from_header(cookie_header: Option<&str>) -> Self {
        let mut inbound = HashMap::new();
        if let Some(h) = cookie_header {
            for (k, v) in parse_cookie_header(h) {
                // First occurrence wins, matching browser ordering (most specific path first).
                inbound.entry(k).or_insert(v);
            }
        }
        Self { inbound, overlay: RwLock::new(HashMap::new()), outbound: Mutex::new(BTreeMap::new()) }
    }

    /// Build from request headers; several `Cookie` headers are joined.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let joined = headers
            .get_all(axum::http::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join("; ");
        if joined.is_empty() { Self::from_header(None) } else { Self::from_header(Some(&joined)) }
    }

    /// Value as sent by the browser, ignoring mutations made during this pass.
    pub fn inbound(&self, key: &str) -> Option<&str> {
        self.inbound.get(key).map(|s| s.as_str())
    }

    /// `Set-Cookie` header values produced so far, ordered by cookie name.
    pub fn set_cookie_headers(&self) -> Vec<String> {
        self.outbound.lock().values().cloned().collect()
    }

    /// Re-emit the long-lived identity cookies the browser sent so their
    /// lifetimes are refreshed. Keys already written or erased during this pass
    /// are left alone. The device id is only forwarded when consent allows it.
    pub fn forward_important_cookies(&self, cfg: &SessionConfig, include_device: bool) -> usize {
        let mut names = vec![keys::AUTH_TOKEN, keys::REFRESH_TOKEN];
        if include_device { names.push(keys::DEVICE_ID); }
        let overlay = self.overlay.read();
        let mut out = self.outbound.lock();
        let mut forwarded = 0;
        for name in names {
            if overlay.contains_key(name) || out.contains_key(name) { continue; }
            let Some(value) = self.inbound.get(name) else { continue; };
            out.insert(name.to_string(), format_set_cookie(name, value, &cfg.policy_for(name)));
            forwarded += 1;
        }
        forwarded
    }
}

impl PersistedChannel for RequestCookieChannel {
    fn read(&self, key: &str) -> Option<String> {
        if let Some(v) = self.overlay.read().get(key) {
            return v.clone();
        }
        self.inbound.get(key).cloned()
    }

    fn write(&self, key: &str, value: &str, policy: &CookiePolicy) -> Result<(), ChannelError> {
        let visible = if policy.max_age_secs == 0 { None } else { Some(value.to_string()) };
        self.overlay.write().insert(key.to_string(), visible);
        self.outbound.lock().insert(key.to_string(), format_set_cookie(key, value, policy));
        Ok(())
    }

    fn erase(&self, key: &str) -> Result<(), ChannelError> {
        let was_present = self.read(key).is_some();
        self.overlay.write().insert(key.to_string(), None);
        let mut out = self.outbound.lock();
        if was_present || out.contains_key(key) {
            out.insert(key.to_string(), format_clear_cookie(key, "/"));
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        let overlay = self.overlay.read();
        let mut keys: Vec<String> = self
            .inbound
            .keys()
            .filter(|k| !overlay.contains_key(*k))
            .cloned()
            .chain(overlay.iter().filter(|(_, v)| v.is_some()).map(|(k, _)| k.clone()))
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}
