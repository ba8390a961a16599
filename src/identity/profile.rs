use serde::{Deserialize, Serialize};

/// Role names that unlock the administration area.
pub const ADMIN_ROLES: &[&str] = &["admin", "super-admin", "administrator"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: String,
}

impl Role {
    pub fn named(name: &str) -> Self { Self { id: None, name: name.to_string() } }
}

/// Snapshot returned by the profile endpoint. Used for authorization checks
/// only; the access token alone decides whether the user is authenticated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
    /// Remaining profile fields, kept verbatim for collaborators.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserProfile {
    pub fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn is_admin(&self) -> bool {
        ADMIN_ROLES.iter().any(|r| self.has_role(r))
    }

    pub fn role_names(&self) -> Vec<&str> {
        self.roles.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.nickname.as_deref().filter(|s| !s.is_empty()).or(self.username.as_deref())
    }
}
