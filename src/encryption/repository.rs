//! Codec-backed repository
//!
//! Encryption happens at an explicit `load` / `save` boundary: entities in
//! memory always hold plaintext, rows in the store hold envelopes for the
//! attributes the codec designates.

use std::sync::Arc;

use serde::{de::DeserializeOwned, ser::Error as _, Serialize};
use serde_json::Value;

use super::codec::{Attributes, FieldCodec};
use super::store::RecordStore;
use crate::error::CodecError;

/// An entity persisted through [`EncryptedRepository`].
///
/// The entity serializes to a JSON object whose keys are its column names.
/// Its id is carried under `id` and is `None` until first saved.
pub trait EncryptedEntity: Serialize + DeserializeOwned {
    /// Table / schema name registered with the codec
    const ENTITY: &'static str;

    /// Row id, if persisted
    fn id(&self) -> Option<i64>;

    /// Record the id assigned on insert
    fn set_id(&mut self, id: i64);
}

/// Loads and saves entities through a [`FieldCodec`]
#[derive(Clone)]
pub struct EncryptedRepository {
    codec: Arc<FieldCodec>,
    store: Arc<dyn RecordStore>,
}

impl EncryptedRepository {
    /// Create a repository over a codec and a store
    pub fn new(codec: Arc<FieldCodec>, store: Arc<dyn RecordStore>) -> Self {
        Self { codec, store }
    }

    /// The codec in use
    pub fn codec(&self) -> &FieldCodec {
        &self.codec
    }

    /// Load and decode an entity by id
    pub fn load<E: EncryptedEntity>(&self, id: i64) -> Result<Option<E>, CodecError> {
        match self.store.get(E::ENTITY, id)? {
            Some(row) => self.decode_row(row).map(Some),
            None => Ok(None),
        }
    }

    /// Encode and persist an entity, inserting it if it has no id yet.
    ///
    /// Returns the row id. The in-memory entity is left in plaintext.
    pub fn save<E: EncryptedEntity>(&self, entity: &mut E) -> Result<i64, CodecError> {
        let mut attributes = to_attributes(entity)?;
        attributes.remove("id");
        let stored = self.codec.encode_for_write(E::ENTITY, attributes)?;

        match entity.id() {
            Some(id) => {
                self.store.update(E::ENTITY, id, stored)?;
                Ok(id)
            }
            None => {
                let id = self.store.insert(E::ENTITY, stored)?;
                entity.set_id(id);
                Ok(id)
            }
        }
    }

    /// Find the first entity whose encrypted attribute decrypts to
    /// `plaintext`.
    ///
    /// First tries an equality query with the probe encoded under the
    /// current key, which only matches rows written without key material
    /// (envelopes carry a random IV). Then scans every row, decoding each
    /// and comparing plaintext. The scan is O(n) in the table size; this is
    /// the scaling limit of searching encrypted columns.
    pub fn find_by_encrypted<E: EncryptedEntity>(
        &self,
        field: &str,
        plaintext: &str,
    ) -> Result<Option<E>, CodecError> {
        let probe = self.codec.encode_probe(plaintext)?;
        if let Some(row) = self.store.find_eq(E::ENTITY, field, &probe)?.into_iter().next() {
            return self.decode_row(row).map(Some);
        }

        for row in self.store.all(E::ENTITY)? {
            let decoded = self.codec.decode_for_read(E::ENTITY, row)?;
            if decoded.attributes.get(field).and_then(Value::as_str) == Some(plaintext) {
                return from_attributes(decoded.attributes).map(Some);
            }
        }

        Ok(None)
    }

    /// Load every entity of a type
    pub fn all<E: EncryptedEntity>(&self) -> Result<Vec<E>, CodecError> {
        self.store
            .all(E::ENTITY)?
            .into_iter()
            .map(|row| self.decode_row(row))
            .collect()
    }

    fn decode_row<E: EncryptedEntity>(&self, row: Attributes) -> Result<E, CodecError> {
        let decoded = self.codec.decode_for_read(E::ENTITY, row)?;
        from_attributes(decoded.attributes)
    }
}

fn to_attributes<E: Serialize>(entity: &E) -> Result<Attributes, CodecError> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        _ => Err(CodecError::Mapping(serde_json::Error::custom(
            "entity must serialize to a JSON object",
        ))),
    }
}

fn from_attributes<E: DeserializeOwned>(attributes: Attributes) -> Result<E, CodecError> {
    Ok(serde_json::from_value(Value::Object(attributes))?)
}
