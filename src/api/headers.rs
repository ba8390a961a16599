use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};

use super::transport::TransportError;
use crate::identity::DeviceIdentityResolver;
use crate::session::SessionStore;

/// Identity headers for one outbound call. Every field is optional; an
/// anonymous or non-consented request simply carries fewer headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundHeaders {
    pub device_id: Option<String>,
    pub authorization: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl OutboundHeaders {
    pub fn bearer(&self) -> Option<&str> {
        self.authorization.as_deref().and_then(|v| v.strip_prefix("Bearer "))
    }

    pub fn set_bearer(&mut self, token: &str) {
        self.authorization = Some(format!("Bearer {}", token));
    }

    pub fn to_header_map(&self, device_header: &str) -> Result<HeaderMap, TransportError> {
        let mut map = HeaderMap::new();
        let mut put = |name: &str, value: &str| -> Result<(), TransportError> {
            let n = HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransportError::InvalidHeader(format!("{name}: {e}")))?;
            let v = HeaderValue::from_str(value).map_err(|e| TransportError::InvalidHeader(format!("{name}: {e}")))?;
            map.insert(n, v);
            Ok(())
        };
        for (k, v) in &self.extra {
            put(k, v)?;
        }
        if let Some(id) = &self.device_id {
            put(device_header, id)?;
        }
        if let Some(auth) = &self.authorization {
            put(AUTHORIZATION.as_str(), auth)?;
        }
        Ok(map)
    }
}

/// Pre-request decoration shared by the pipeline and the raw logout call.
/// Reads identity only; never creates a device id and never fails.
#[derive(Clone)]
pub struct IdentityHeaders {
    resolver: Arc<DeviceIdentityResolver>,
    store: Arc<SessionStore>,
    persisted_fallback: bool,
}

impl IdentityHeaders {
    pub fn new(resolver: Arc<DeviceIdentityResolver>, store: Arc<SessionStore>) -> Self {
        Self { resolver, store, persisted_fallback: false }
    }

    /// Let a request issued before bootstrap borrow the persisted token.
    /// Only render passes enable this; the persistent store is authoritative.
    pub fn with_persisted_fallback(mut self, enabled: bool) -> Self {
        self.persisted_fallback = enabled;
        self
    }

    pub fn decorate(&self, headers: &mut OutboundHeaders) {
        if let Some(device) = self.resolver.current() {
            headers.device_id = Some(device.id);
        }
        let token = match self.store.token() {
            Some(t) => Some(t),
            None if self.persisted_fallback => self.store.adoptable_token(),
            None => None,
        };
        if let Some(token) = token {
            headers.set_bearer(&token);
        }
    }
}
