//! Encryption at rest
//!
//! Field-level AES-256-GCM for designated entity attributes.
//!
//! - [`FieldCipher`]: stateless encrypt/decrypt of scalar values into an
//!   [`EncryptedEnvelope`]
//! - [`FieldCodec`]: per-entity registry of encrypted attributes,
//!   applied to whole rows on write and read
//! - [`EncryptedRepository`]: explicit `load` / `save` boundary over a
//!   [`RecordStore`], plus lookup by encrypted attribute
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use eventguard::encryption::{EncryptedRepository, FieldCipher, FieldCodec, InMemoryRecordStore};
//!
//! let codec = Arc::new(FieldCodec::with_builtin_schemas(FieldCipher::from_env()));
//! let repo = EncryptedRepository::new(codec, Arc::new(InMemoryRecordStore::new()));
//!
//! let id = repo.save(&mut account)?;
//! let account: Option<Account> = repo.find_by_encrypted("email", "alice@example.com")?;
//! ```

mod cipher;
mod codec;
mod repository;
mod store;

pub use cipher::{EncryptedEnvelope, FieldCipher};
pub use codec::{Attributes, DecodePolicy, Decoded, FieldCodec};
pub use repository::{EncryptedEntity, EncryptedRepository};
pub use store::{InMemoryRecordStore, RecordStore};
