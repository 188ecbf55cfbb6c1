//! Field cipher
//!
//! AES-256-GCM encryption of scalar values into a self-describing envelope:
//! `base64(JSON{"iv", "value", "mac"})`, where `iv` is the random 96-bit
//! nonce, `value` the ciphertext and `mac` the detached GCM tag (all three
//! base64). The cipher holds only key material and is safe to share across
//! threads.

use std::env;
use std::fmt;

use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::crypto::{random_bytes, sha256};
use crate::error::CipherError;
use crate::observability::SecurityEvent;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Serialized shape of an encrypted value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Base64 nonce
    pub iv: String,
    /// Base64 ciphertext
    pub value: String,
    /// Base64 authentication tag
    pub mac: String,
}

impl EncryptedEnvelope {
    /// Parse a stored string. `None` unless it is base64 JSON carrying all
    /// three envelope fields.
    pub fn parse(stored: &str) -> Option<Self> {
        let decoded = STANDARD.decode(stored.trim()).ok()?;
        serde_json::from_slice(&decoded).ok()
    }

    /// Serialize to the stored string form
    pub fn to_stored(&self) -> Result<String, CipherError> {
        let json = serde_json::to_vec(self).map_err(|_| CipherError::Encryption)?;
        Ok(STANDARD.encode(json))
    }
}

/// Symmetric cipher for designated entity attributes.
///
/// # Key handling
///
/// Key material that is not exactly 32 bytes is replaced by its SHA-256
/// digest. A key shorter than 32 bytes still works but is logged as weak.
/// A cipher built without key material reports
/// [`CipherError::Configuration`] on every encrypt/decrypt.
#[derive(Clone)]
pub struct FieldCipher {
    key: Option<[u8; KEY_LEN]>,
}

impl FieldCipher {
    /// Create a cipher from raw key material
    pub fn new(key_material: impl AsRef<[u8]>) -> Self {
        let material = key_material.as_ref();
        if material.is_empty() {
            return Self::unconfigured();
        }

        if material.len() < KEY_LEN {
            crate::security_event!(
                SecurityEvent::WeakEncryptionKey,
                key_length = material.len(),
                "Field encryption key is shorter than 32 bytes; deriving key by SHA-256"
            );
        }

        let key = if material.len() == KEY_LEN {
            let mut key = [0u8; KEY_LEN];
            key.copy_from_slice(material);
            key
        } else {
            sha256(material)
        };

        Self { key: Some(key) }
    }

    /// A cipher with no key material
    pub fn unconfigured() -> Self {
        Self { key: None }
    }

    /// Build from the environment.
    ///
    /// Reads `DB_FIELD_ENCRYPTION_KEY`, falling back to `APP_KEY`. An
    /// `APP_KEY` of the form `base64:...` is decoded first.
    pub fn from_env() -> Self {
        let field_key = env::var("DB_FIELD_ENCRYPTION_KEY").ok();
        let app_key = env::var("APP_KEY").ok();
        Self::from_key_sources(field_key.as_deref(), app_key.as_deref())
    }

    /// Resolve key material the same way [`FieldCipher::from_env`] does
    pub fn from_key_sources(field_key: Option<&str>, app_key: Option<&str>) -> Self {
        match field_key.filter(|k| !k.is_empty()) {
            Some(key) => Self::new(key),
            None => match app_key.filter(|k| !k.is_empty()) {
                Some(key) => Self::new(decode_app_key(key)),
                None => Self::unconfigured(),
            },
        }
    }

    /// Whether key material is present
    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    fn aead(&self) -> Result<Aes256Gcm, CipherError> {
        let key = self.key.as_ref().ok_or(CipherError::Configuration)?;
        Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::Configuration)
    }

    /// Encrypt a value into its stored envelope form.
    ///
    /// The empty string is returned unchanged.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let cipher = self.aead()?;
        let iv: [u8; NONCE_LEN] = random_bytes();
        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| CipherError::Encryption)?;

        EncryptedEnvelope {
            iv: STANDARD.encode(iv),
            value: STANDARD.encode(&buffer),
            mac: STANDARD.encode(tag),
        }
        .to_stored()
    }

    /// Decrypt a stored envelope.
    ///
    /// The empty string is returned unchanged.
    ///
    /// # Errors
    ///
    /// [`CipherError::Decryption`] if the envelope is malformed or the tag
    /// does not verify under this key.
    pub fn decrypt(&self, stored: &str) -> Result<String, CipherError> {
        if stored.is_empty() {
            return Ok(String::new());
        }

        let cipher = self.aead()?;
        let envelope = EncryptedEnvelope::parse(stored)
            .ok_or_else(|| CipherError::Decryption("not an encrypted envelope".into()))?;

        let iv = decode_part(&envelope.iv, "iv")?;
        let tag = decode_part(&envelope.mac, "mac")?;
        let mut buffer = decode_part(&envelope.value, "value")?;

        if iv.len() != NONCE_LEN {
            return Err(CipherError::Decryption("invalid iv length".into()));
        }
        if tag.len() != TAG_LEN {
            return Err(CipherError::Decryption("invalid mac length".into()));
        }

        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&iv),
                b"",
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| CipherError::Decryption("mac verification failed".into()))?;

        String::from_utf8(buffer).map_err(|_| CipherError::Decryption("invalid utf-8".into()))
    }

    /// Encrypt an optional value; `None` stays `None`
    pub fn encrypt_field(&self, value: Option<&str>) -> Result<Option<String>, CipherError> {
        value.map(|v| self.encrypt(v)).transpose()
    }

    /// Decrypt an optional value; `None` stays `None`
    pub fn decrypt_field(&self, value: Option<&str>) -> Result<Option<String>, CipherError> {
        value.map(|v| self.decrypt(v)).transpose()
    }

    /// Encrypt, or return the plaintext unchanged when no key is configured.
    ///
    /// Other encryption failures are still returned.
    pub fn encrypt_or_passthrough(&self, plaintext: &str) -> Result<String, CipherError> {
        match self.encrypt(plaintext) {
            Err(CipherError::Configuration) => {
                crate::security_event!(
                    SecurityEvent::FieldEncryptionDegraded,
                    operation = "encrypt",
                    "Field encryption skipped: no key configured"
                );
                Ok(plaintext.to_string())
            }
            other => other,
        }
    }

    /// Decrypt, or return the stored value unchanged on any failure
    pub fn decrypt_or_passthrough(&self, stored: &str) -> String {
        match self.decrypt(stored) {
            Ok(plain) => plain,
            Err(CipherError::Configuration) => stored.to_string(),
            Err(e) => {
                crate::security_event!(
                    SecurityEvent::FieldEncryptionDegraded,
                    operation = "decrypt",
                    error = %e,
                    "Field decryption failed, returning stored value"
                );
                stored.to_string()
            }
        }
    }

    /// Whether a stored value carries the envelope shape
    pub fn is_encrypted(value: &str) -> bool {
        !value.is_empty() && EncryptedEnvelope::parse(value).is_some()
    }
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCipher")
            .field("configured", &self.is_configured())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

fn decode_part(part: &str, name: &str) -> Result<Vec<u8>, CipherError> {
    STANDARD
        .decode(part)
        .map_err(|_| CipherError::Decryption(format!("invalid base64 in {}", name)))
}

fn decode_app_key(key: &str) -> Vec<u8> {
    match key.strip_prefix("base64:") {
        Some(encoded) => STANDARD
            .decode(encoded)
            .unwrap_or_else(|_| encoded.as_bytes().to_vec()),
        None => key.as_bytes().to_vec(),
    }
}
