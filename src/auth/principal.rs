//! # Principals
//!
//! Two kinds of callers reach the service: admin panel users, who carry a list
//! of role codes, and end users of the content API, who carry a single role.

use serde::{Deserialize, Serialize};

/// Role codes that make an admin panel user an administrator
pub const ADMIN_ROLE_CODES: &[&str] = &["strapi-super-admin", "strapi-admin"];

/// Role names that make an end user an administrator
pub const ADMIN_ROLE_NAMES: &[&str] = &["admin", "administrator"];

/// Role of an end user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl UserRole {
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self {
            name: Some(name.into()),
            kind: None,
        }
    }

    /// Lowercased name, falling back to the type
    fn label(&self) -> String {
        self.name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or_else(|| self.kind.as_deref())
            .unwrap_or_default()
            .to_lowercase()
    }
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Principal {
    /// Admin panel user
    AdminPanel { email: String, roles: Vec<String> },

    /// Content API user
    EndUser {
        id: u64,
        email: Option<String>,
        role: Option<UserRole>,
    },
}

impl Principal {
    /// Identifier for logs
    pub fn display_name(&self) -> String {
        match self {
            Self::AdminPanel { email, .. } => email.clone(),
            Self::EndUser { id, email, .. } => email.clone().unwrap_or_else(|| id.to_string()),
        }
    }

    pub fn is_admin(&self) -> bool {
        match self {
            Self::AdminPanel { roles, .. } => roles.iter().any(|code| ADMIN_ROLE_CODES.contains(&code.as_str())),
            Self::EndUser { role, .. } => role
                .as_ref()
                .map_or(false, |role| ADMIN_ROLE_NAMES.contains(&role.label().as_str())),
        }
    }

    /// The role used for role checks: the first role code of an admin panel
    /// user, or the end user's role label
    pub fn role_label(&self) -> String {
        match self {
            Self::AdminPanel { roles, .. } => roles.first().cloned().unwrap_or_default(),
            Self::EndUser { role, .. } => role.as_ref().map(UserRole::label).unwrap_or_default(),
        }
    }

    /// Whether the role label contains any of `required` (case-insensitive)
    pub fn has_role(&self, required: &[&str]) -> bool {
        let label = self.role_label().to_lowercase();
        !label.is_empty() && required.iter().any(|role| label.contains(&role.to_lowercase()))
    }
}
