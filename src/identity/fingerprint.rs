use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use axum::http::HeaderMap;
use futures_util::future::BoxFuture;
use xxhash_rust::xxh3::xxh3_128;

/// Produces a deterministic identifier from the environment. May suspend and
/// may fail; callers bound it with a timeout and fall back to a random token.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self) -> BoxFuture<'_, Result<String>>;
}

/// Environment signals that feed the fingerprint. Empty values are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSignals {
    pub signals: BTreeMap<String, String>,
}

/// Fewer usable signals than this means the environment is too restricted to
/// produce a stable fingerprint.
const MIN_SIGNALS: usize = 2;

impl EnvironmentSignals {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        let v = value.into();
        let v = v.trim();
        if !v.is_empty() {
            self.signals.insert(name.to_ascii_lowercase(), v.to_string());
        }
        self
    }

    /// Browser signals available to a render pass.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut s = Self::new();
        for name in ["user-agent", "accept-language", "accept-encoding", "sec-ch-ua", "sec-ch-ua-platform", "sec-ch-ua-mobile"] {
            if let Some(v) = headers.get(name).and_then(|v| v.to_str().ok()) {
                s = s.with(name, v);
            }
        }
        s
    }

    /// Signals describing the local process, for the persistent client binary.
    pub fn from_process() -> Self {
        let mut s = Self::new()
            .with("os", std::env::consts::OS)
            .with("arch", std::env::consts::ARCH)
            .with("family", std::env::consts::FAMILY);
        for var in ["HOSTNAME", "COMPUTERNAME", "USER", "USERNAME", "LANG", "TZ"] {
            if let Ok(v) = std::env::var(var) {
                s = s.with(var, v);
            }
        }
        s
    }

    pub fn usable(&self) -> usize { self.signals.len() }

    fn canonical(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.signals {
            out.push_str(k);
            out.push('=');
            out.push_str(v);
            out.push('\n');
        }
        out
    }
}

pub struct EnvironmentFingerprinter {
    signals: EnvironmentSignals,
}

impl EnvironmentFingerprinter {
    pub fn new(signals: EnvironmentSignals) -> Self { Self { signals } }

    pub fn compute(&self) -> Result<String> {
        if self.signals.usable() < MIN_SIGNALS {
            return Err(anyhow!("insufficient environment signals ({} usable)", self.signals.usable()));
        }
        Ok(format!("{:032x}", xxh3_128(self.signals.canonical().as_bytes())))
    }
}

impl Fingerprinter for EnvironmentFingerprinter {
    fn fingerprint(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move { self.compute() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn same_signals_same_fingerprint() {
        let a = EnvironmentSignals::new().with("user-agent", "UA/1").with("accept-language", "zh-CN");
        let b = EnvironmentSignals::new().with("Accept-Language", "zh-CN").with("user-agent", " UA/1 ");
        let fa = EnvironmentFingerprinter::new(a).compute().unwrap();
        let fb = EnvironmentFingerprinter::new(b).compute().unwrap();
        assert_eq!(fa, fb);
        assert_eq!(fa.len(), 32);
        assert!(!fa.starts_with("device-"));
    }

    #[test]
    fn different_signals_differ() {
        let a = EnvironmentSignals::new().with("user-agent", "UA/1").with("accept-language", "en");
        let b = EnvironmentSignals::new().with("user-agent", "UA/2").with("accept-language", "en");
        assert_ne!(
            EnvironmentFingerprinter::new(a).compute().unwrap(),
            EnvironmentFingerprinter::new(b).compute().unwrap()
        );
    }

    #[test]
    fn restricted_environment_fails() {
        let only_ua = EnvironmentSignals::new().with("user-agent", "UA/1").with("accept-language", "   ");
        assert!(EnvironmentFingerprinter::new(only_ua).compute().is_err());
    }

    #[test]
    fn header_signals_are_collected() {
        let mut h = HeaderMap::new();
        h.insert("user-agent", HeaderValue::from_static("Mozilla/5.0"));
        h.insert("accept-language", HeaderValue::from_static("ja"));
        h.insert("cookie", HeaderValue::from_static("auth-token=secret"));
        let s = EnvironmentSignals::from_headers(&h);
        assert_eq!(s.usable(), 2);
        assert!(!s.signals.contains_key("cookie"));
    }
}
