//! Route access decisions made from the session store on every navigation.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashSet;

use super::store::SessionStore;

static AUTH_PAGES: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["/user/login", "/user/register", "/user/forgot-password"].into_iter().collect());

/// Roles whose visit to an auth page lands on the admin home.
const ADMIN_HOME_ROLES: &[&str] = &["admin", "super-admin"];

/// A redirect target is safe when it is a non-empty in-app path that does not
/// lead back to an auth page or carry a nested redirect.
pub fn is_safe_redirect_path(path: &str) -> bool {
    let p = path.trim();
    if p.is_empty() || !p.starts_with('/') || p.starts_with("//") {
        return false;
    }
    let lower = p.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") || lower.contains("redirect=") {
        return false;
    }
    let bare = lower.split(['?', '#']).next().unwrap_or("");
    !AUTH_PAGES.contains(bare.trim_end_matches('/'))
}

/// Login location carrying the original target when it is safe to return to.
pub fn login_location(login_path: &str, target: &str) -> String {
    if is_safe_redirect_path(target) {
        format!("{}?redirect={}", login_path, urlencoding::encode(target))
    } else {
        login_path.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "location", rename_all = "snake_case")]
pub enum RouteDecision {
    Allow,
    Redirect(String),
}

#[derive(Debug, Clone)]
pub struct RouteGuard {
    login_path: String,
    admin_prefix: String,
    admin_home: String,
    user_home: String,
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self::new("/user/login")
    }
}

impl RouteGuard {
    pub fn new(login_path: &str) -> Self {
        Self {
            login_path: login_path.to_string(),
            admin_prefix: "/admin".to_string(),
            admin_home: "/admin".to_string(),
            user_home: "/user".to_string(),
        }
    }

    /// `full_path` includes the query string and is what gets preserved in
    /// the login redirect.
    pub fn decide(&self, store: &SessionStore, full_path: &str, requires_auth: bool) -> RouteDecision {
        let path = full_path.split(['?', '#']).next().unwrap_or("/");
        let authenticated = store.is_authenticated();

        if authenticated && AUTH_PAGES.contains(path.trim_end_matches('/')) {
            let home = match store.profile() {
                Some(p) if ADMIN_HOME_ROLES.iter().any(|r| p.has_role(r)) => &self.admin_home,
                _ => &self.user_home,
            };
            return RouteDecision::Redirect(home.clone());
        }

        let admin_area = path == self.admin_prefix || path.starts_with(&format!("{}/", self.admin_prefix));
        if (requires_auth || admin_area) && !authenticated {
            return RouteDecision::Redirect(login_location(&self.login_path, full_path));
        }
        if admin_area && !store.is_admin() {
            return RouteDecision::Redirect(self.user_home.clone());
        }
        RouteDecision::Allow
    }
}
