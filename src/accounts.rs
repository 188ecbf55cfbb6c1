//! User accounts
//!
//! `users` rows keep `email` and `mfa_secret` encrypted at rest. All access
//! goes through [`AccountRepository`], which loads and saves via the field
//! codec so an [`Account`] in memory always holds plaintext.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::encryption::{EncryptedEntity, EncryptedRepository};
use crate::error::CodecError;

/// A user account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Row id, `None` until first saved
    #[serde(default)]
    pub id: Option<i64>,
    /// Display name
    pub name: String,
    /// Login email (encrypted at rest)
    pub email: String,
    /// Password hash, opaque to this crate
    pub password_hash: String,
    /// Base32 TOTP secret (encrypted at rest)
    #[serde(default)]
    pub mfa_secret: Option<String>,
    /// Whether TOTP step-up is required at login
    #[serde(default)]
    pub mfa_enabled: bool,
}

impl Account {
    /// New unsaved account. The email is trimmed and lowercased.
    pub fn new(name: impl Into<String>, email: &str, password_hash: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            email: normalize_email(email),
            password_hash: password_hash.into(),
            mfa_secret: None,
            mfa_enabled: false,
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password_hash", &"[REDACTED]")
            .field("mfa_secret", &self.mfa_secret.as_ref().map(|_| "[REDACTED]"))
            .field("mfa_enabled", &self.mfa_enabled)
            .finish()
    }
}

impl EncryptedEntity for Account {
    const ENTITY: &'static str = "users";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

/// Canonical form of an email used for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Account persistence over the encrypted repository
#[derive(Clone)]
pub struct AccountRepository {
    repo: EncryptedRepository,
}

impl AccountRepository {
    /// Wrap a repository whose codec has the `users` schema registered
    pub fn new(repo: EncryptedRepository) -> Self {
        Self { repo }
    }

    /// Load an account by id
    pub fn load(&self, id: i64) -> Result<Option<Account>, CodecError> {
        self.repo.load(id)
    }

    /// Insert or update an account
    pub fn save(&self, account: &mut Account) -> Result<i64, CodecError> {
        self.repo.save(account)
    }

    /// Find an account by login email.
    ///
    /// Emails are stored encrypted with a random IV, so this decodes every
    /// row in the worst case.
    pub fn find_by_email(&self, email: &str) -> Result<Option<Account>, CodecError> {
        self.repo.find_by_encrypted("email", &normalize_email(email))
    }
}
