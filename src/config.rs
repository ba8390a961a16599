use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Persisted channel key names shared by every backend.
pub mod keys {
    pub const AUTH_TOKEN: &str = "auth-token";
    pub const REFRESH_TOKEN: &str = "refresh-token";
    pub const DEVICE_ID: &str = "device-id";
    pub const CONSENT: &str = "cookie-consent";
    pub const CONSENT_SETTINGS: &str = "cookie-settings";
    pub const CONSENT_RECORD: &str = "cookie-consent-record";
    pub const USER: &str = "user";
    pub const REMEMBERED_USERNAME: &str = "remembered-username";
    // Legacy credential names still cleared on logout
    pub const LEGACY_TOKEN: &str = "token";
    pub const USER_SESSION: &str = "user-session";
}

const DAY_SECS: u64 = 60 * 60 * 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Attributes applied when a value is written to a persisted channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookiePolicy {
    pub max_age_secs: u64,
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
    pub http_only: bool,
}

impl CookiePolicy {
    pub fn with_max_age(max_age_secs: u64, secure: bool) -> Self {
        Self { max_age_secs, secure, same_site: SameSite::Lax, path: "/".to_string(), http_only: false }
    }
}

/// Bounded retry for the persistent-context bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff_ms: 100, max_backoff_ms: 1_000 }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `n` (1-based), doubling from the initial delay and capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self.initial_backoff_ms.saturating_mul(1u64 << shift).min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Settings for one identity context. Unspecified environment values keep the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub api_base_url: String,
    pub api_timeout_ms: u64,
    pub profile_path: String,
    pub logout_path: String,
    pub device_header: String,

    pub access_token_max_age_secs: u64,
    pub refresh_token_max_age_secs: u64,
    pub device_id_max_age_secs: u64,
    pub consent_max_age_secs: u64,
    pub consent_record_max_age_secs: u64,
    pub secure_cookies: bool,
    pub consent_version: String,

    pub logout_cooldown_ms: u64,
    pub fingerprint_timeout_ms: u64,
    pub bootstrap_retry: RetryPolicy,

    /// Where the client lands after logout. Must pass the safe-redirect check.
    pub logout_redirect: String,
    pub login_path: String,

    pub http_port: u16,
    pub state_dir: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:3000/api/v1".to_string(),
            api_timeout_ms: 30_000,
            profile_path: "/user/profile".to_string(),
            logout_path: "/user/logout".to_string(),
            device_header: "x-device-id".to_string(),

            access_token_max_age_secs: 7 * DAY_SECS,
            refresh_token_max_age_secs: 90 * DAY_SECS,
            device_id_max_age_secs: 365 * DAY_SECS,
            consent_max_age_secs: 180 * DAY_SECS,
            consent_record_max_age_secs: 2 * 365 * DAY_SECS,
            secure_cookies: false,
            consent_version: "1.0".to_string(),

            logout_cooldown_ms: 2_000,
            fingerprint_timeout_ms: 500,
            bootstrap_retry: RetryPolicy::default(),

            logout_redirect: "/".to_string(),
            login_path: "/user/login".to_string(),

            http_port: 7878,
            state_dir: None,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl SessionConfig {
    /// Defaults overlaid with `PICART_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_string("PICART_API_BASE_URL") { cfg.api_base_url = v; }
        if let Some(v) = env_u64("PICART_API_TIMEOUT_MS") { cfg.api_timeout_ms = v; }
        if let Some(v) = env_string("PICART_DEVICE_HEADER") { cfg.device_header = v; }
        if let Some(v) = env_u64("PICART_LOGOUT_COOLDOWN_MS") { cfg.logout_cooldown_ms = v; }
        if let Some(v) = env_u64("PICART_FINGERPRINT_TIMEOUT_MS") { cfg.fingerprint_timeout_ms = v; }
        if let Some(v) = env_u64("PICART_BOOTSTRAP_ATTEMPTS") { cfg.bootstrap_retry.max_attempts = v.max(1) as u32; }
        if let Some(v) = env_u64("PICART_HTTP_PORT").and_then(|p| u16::try_from(p).ok()) { cfg.http_port = v; }
        if let Some(v) = env_string("PICART_STATE_DIR") { cfg.state_dir = Some(v); }
        if let Some(v) = env_string("PICART_ENV") { cfg.secure_cookies = v.eq_ignore_ascii_case("production"); }
        cfg
    }

    pub fn api_timeout(&self) -> Duration { Duration::from_millis(self.api_timeout_ms) }
    pub fn logout_cooldown(&self) -> Duration { Duration::from_millis(self.logout_cooldown_ms) }
    pub fn fingerprint_timeout(&self) -> Duration { Duration::from_millis(self.fingerprint_timeout_ms) }

    /// Cookie attributes for a given persisted key.
    pub fn policy_for(&self, key: &str) -> CookiePolicy {
        let max_age = match key {
            keys::AUTH_TOKEN | keys::LEGACY_TOKEN | keys::USER | keys::USER_SESSION => self.access_token_max_age_secs,
            keys::REFRESH_TOKEN => self.refresh_token_max_age_secs,
            keys::DEVICE_ID => self.device_id_max_age_secs,
            keys::CONSENT | keys::CONSENT_SETTINGS => self.consent_max_age_secs,
            keys::CONSENT_RECORD => self.consent_record_max_age_secs,
            keys::REMEMBERED_USERNAME => self.refresh_token_max_age_secs,
            _ => self.access_token_max_age_secs,
        };
        CookiePolicy::with_max_age(max_age, self.secure_cookies)
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
    }
}
