//! User model for storage and API.

use serde::{Deserialize, Serialize};

/// User account stored in the active backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Opaque user ID (also used as document ID)
    pub id: String,
    /// Normalized (trimmed, lower-cased) email, unique per store
    pub email: String,
    /// Argon2id PHC string; None for identity-provider-only accounts
    pub password_hash: Option<String>,
    pub display_name: String,
    pub phone: Option<String>,
    pub avatar_url: String,
    /// Subject of the linked third-party identity, if any. Only ever set
    /// from a verified identity claim.
    pub external_identity_id: Option<String>,
    pub created_at: String,
    pub last_login_at: Option<String>,
}

impl User {
    /// Build a new account record with a fresh ID.
    pub fn new(email: &str, display_name: &str, created_at: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: normalize_email(email),
            password_hash: None,
            display_name: display_name.trim().to_string(),
            phone: None,
            avatar_url: default_avatar_url(display_name),
            external_identity_id: None,
            created_at,
            last_login_at: None,
        }
    }

    /// Whether this account can sign in with a password.
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    /// Whether a password or a verified identity protects this account.
    ///
    /// Accounts without either were created from an unverified identity
    /// claim and are the only ones an unverified claim may enter.
    pub fn has_verified_credentials(&self) -> bool {
        self.has_password() || self.external_identity_id.is_some()
    }
}

/// Emails compare case-insensitively; store and look up the lower-cased form.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Generated initials avatar used when the account has no picture.
pub fn default_avatar_url(name: &str) -> String {
    format!(
        "https://ui-avatars.com/api/?name={}&background=D4AF37&color=000",
        urlencoding::encode(name.trim())
    )
}
