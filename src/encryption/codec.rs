//! Transparent field codec
//!
//! Encrypts the designated attributes of an entity on the way into storage
//! and decrypts them on the way out. The codec works on attribute maps
//! (`serde_json::Map`) so it sits between any entity type and any row store.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use super::cipher::FieldCipher;
use crate::error::{CipherError, CodecError};

/// Attribute map of a single row
pub type Attributes = serde_json::Map<String, Value>;

/// What to do when a stored field fails to decrypt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodePolicy {
    /// Keep the stored value and carry on with the rest of the row
    #[default]
    Passthrough,
    /// Fail the read with [`CodecError::Decode`]
    Strict,
}

impl DecodePolicy {
    /// Parse `passthrough` / `strict` (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "passthrough" | "pass-through" => Some(Self::Passthrough),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

/// Result of [`FieldCodec::decode_for_read`]
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// Row with encrypted attributes replaced by plaintext
    pub attributes: Attributes,
    /// Attributes that failed to decrypt and kept their stored value
    pub failed_fields: Vec<String>,
}

/// Per-entity encrypted attribute registry plus the cipher that serves it.
#[derive(Debug, Clone)]
pub struct FieldCodec {
    cipher: FieldCipher,
    schemas: HashMap<String, Vec<String>>,
    policy: DecodePolicy,
}

impl FieldCodec {
    /// Create a codec with no schemas registered
    pub fn new(cipher: FieldCipher) -> Self {
        Self {
            cipher,
            schemas: HashMap::new(),
            policy: DecodePolicy::default(),
        }
    }

    /// Codec preloaded with the application's encrypted columns:
    /// `users.email`, `users.mfa_secret`, `events.description` and
    /// `helpdesk_messages.content`.
    pub fn with_builtin_schemas(cipher: FieldCipher) -> Self {
        Self::new(cipher)
            .with_schema("users", &["email", "mfa_secret"])
            .with_schema("events", &["description"])
            .with_schema("helpdesk_messages", &["content"])
    }

    /// Register (or replace) the encrypted attributes of an entity type
    pub fn with_schema(mut self, entity: &str, fields: &[&str]) -> Self {
        self.schemas.insert(
            entity.to_string(),
            fields.iter().map(|f| f.to_string()).collect(),
        );
        self
    }

    /// Set the decrypt failure policy
    pub fn with_policy(mut self, policy: DecodePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Active decrypt failure policy
    pub fn policy(&self) -> DecodePolicy {
        self.policy
    }

    /// Underlying cipher
    pub fn cipher(&self) -> &FieldCipher {
        &self.cipher
    }

    /// Encrypted attribute names for an entity type (empty if unregistered)
    pub fn encrypted_fields(&self, entity: &str) -> &[String] {
        self.schemas.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether an attribute of an entity type is stored encrypted
    pub fn is_encrypted_field(&self, entity: &str, field: &str) -> bool {
        self.encrypted_fields(entity).iter().any(|f| f == field)
    }

    /// Encrypt every designated attribute that is present, a non-empty
    /// string, and not already an envelope. Everything else is untouched,
    /// so encoding an encoded row is a no-op.
    ///
    /// Without key material the values are written as plaintext and a
    /// warning is logged.
    pub fn encode_for_write(
        &self,
        entity: &str,
        mut attributes: Attributes,
    ) -> Result<Attributes, CodecError> {
        for field in self.encrypted_fields(entity) {
            let Some(Value::String(value)) = attributes.get(field) else {
                continue;
            };
            if value.is_empty() || FieldCipher::is_encrypted(value) {
                continue;
            }

            let stored = self
                .cipher
                .encrypt_or_passthrough(value)
                .map_err(|source| CodecError::Encode {
                    field: field.clone(),
                    source,
                })?;
            attributes.insert(field.clone(), Value::String(stored));
        }

        Ok(attributes)
    }

    /// Decrypt every designated attribute that is present.
    ///
    /// Under [`DecodePolicy::Passthrough`] a field that fails to decrypt
    /// keeps its stored value and is listed in
    /// [`Decoded::failed_fields`]; the rest of the row is still decoded.
    pub fn decode_for_read(
        &self,
        entity: &str,
        mut attributes: Attributes,
    ) -> Result<Decoded, CodecError> {
        let mut failed_fields = Vec::new();

        for field in self.encrypted_fields(entity) {
            let Some(Value::String(stored)) = attributes.get(field) else {
                continue;
            };

            match self.cipher.decrypt(stored) {
                Ok(plain) => {
                    attributes.insert(field.clone(), Value::String(plain));
                }
                // No key: rows were written in plaintext
                Err(CipherError::Configuration) => {}
                Err(source) => match self.policy {
                    DecodePolicy::Strict => {
                        return Err(CodecError::Decode {
                            field: field.clone(),
                            source,
                        })
                    }
                    DecodePolicy::Passthrough => {
                        warn!(
                            entity = entity,
                            field = %field,
                            error = %source,
                            "Field decryption failed, keeping stored value"
                        );
                        failed_fields.push(field.clone());
                    }
                },
            }
        }

        Ok(Decoded {
            attributes,
            failed_fields,
        })
    }

    /// Stored form of a lookup probe for an encrypted attribute
    pub fn encode_probe(&self, plaintext: &str) -> Result<String, CodecError> {
        self.cipher
            .encrypt_or_passthrough(plaintext)
            .map_err(|source| CodecError::Encode {
                field: "probe".into(),
                source,
            })
    }
}
