//! Row store contract
//!
//! The minimum persistence surface the codec-backed repository needs.
//! Rows are attribute maps; the store assigns the integer `id`.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde_json::Value;

use super::codec::Attributes;
use crate::error::StoreError;

/// Persistence for attribute rows grouped by entity type (table).
///
/// Implementations must include the `id` attribute in every returned row.
pub trait RecordStore: Send + Sync {
    /// Insert a row, returning its new id
    fn insert(&self, entity: &str, attributes: Attributes) -> Result<i64, StoreError>;

    /// Replace the attributes of an existing row
    fn update(&self, entity: &str, id: i64, attributes: Attributes) -> Result<(), StoreError>;

    /// Fetch a row by id
    fn get(&self, entity: &str, id: i64) -> Result<Option<Attributes>, StoreError>;

    /// Rows whose string attribute equals `value` exactly
    fn find_eq(&self, entity: &str, field: &str, value: &str)
        -> Result<Vec<Attributes>, StoreError>;

    /// Every row of an entity type, in id order
    fn all(&self, entity: &str) -> Result<Vec<Attributes>, StoreError>;
}

#[derive(Default)]
struct Table {
    next_id: i64,
    rows: BTreeMap<i64, Attributes>,
}

/// In-process [`RecordStore`]
#[derive(Default)]
pub struct InMemoryRecordStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl InMemoryRecordStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a single stored attribute, bypassing any codec.
    ///
    /// Used to simulate rows written by older deployments or other keys.
    pub fn put_raw(&self, entity: &str, id: i64, field: &str, value: Value) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let row = tables
            .get_mut(entity)
            .and_then(|t| t.rows.get_mut(&id))
            .ok_or_else(|| StoreError::NotFound {
                entity: entity.to_string(),
                id,
            })?;
        row.insert(field.to_string(), value);
        Ok(())
    }
}

fn with_id(id: i64, attributes: &Attributes) -> Attributes {
    let mut row = attributes.clone();
    row.insert("id".to_string(), Value::from(id));
    row
}

impl RecordStore for InMemoryRecordStore {
    fn insert(&self, entity: &str, attributes: Attributes) -> Result<i64, StoreError> {
        let mut tables = self.tables.write();
        let table = tables.entry(entity.to_string()).or_default();
        table.next_id += 1;
        let id = table.next_id;
        table.rows.insert(id, with_id(id, &attributes));
        Ok(id)
    }

    fn update(&self, entity: &str, id: i64, attributes: Attributes) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let row = tables
            .get_mut(entity)
            .and_then(|t| t.rows.get_mut(&id))
            .ok_or_else(|| StoreError::NotFound {
                entity: entity.to_string(),
                id,
            })?;
        *row = with_id(id, &attributes);
        Ok(())
    }

    fn get(&self, entity: &str, id: i64) -> Result<Option<Attributes>, StoreError> {
        Ok(self
            .tables
            .read()
            .get(entity)
            .and_then(|t| t.rows.get(&id))
            .cloned())
    }

    fn find_eq(
        &self,
        entity: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Attributes>, StoreError> {
        Ok(self
            .tables
            .read()
            .get(entity)
            .map(|t| {
                t.rows
                    .values()
                    .filter(|row| row.get(field).and_then(Value::as_str) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn all(&self, entity: &str) -> Result<Vec<Attributes>, StoreError> {
        Ok(self
            .tables
            .read()
            .get(entity)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default())
    }
}
