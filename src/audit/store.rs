//! Durable audit stores
//!
//! Append-only. A store never rewrites or deletes a record.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::warn;

use super::record::AuditRecord;
use crate::error::StoreError;

/// Destination for persisted audit records
pub trait AuditStore: Send + Sync {
    /// Append one record
    fn append(&self, record: &AuditRecord) -> Result<(), StoreError>;

    /// Every record created at or after `since`, oldest first
    fn since(&self, since: DateTime<Utc>) -> Result<Vec<AuditRecord>, StoreError>;
}

/// In-process audit store
#[derive(Default)]
pub struct InMemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Snapshot of every stored record
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.read().clone()
    }
}

impl AuditStore for InMemoryAuditStore {
    fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        self.records.write().push(record.clone());
        Ok(())
    }

    fn since(&self, since: DateTime<Utc>) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.created_at >= since)
            .cloned()
            .collect())
    }
}

/// Append-only JSON-lines file, one audit row per line.
///
/// Lines that fail to parse are skipped with a warning when reading.
pub struct JsonlAuditStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditStore {
    /// Open (lazily create) a store at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// File backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditStore for JsonlAuditStore {
    fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn since(&self, since: DateTime<Utc>) -> Result<Vec<AuditRecord>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(&line) {
                Ok(record) if record.created_at >= since => records.push(record),
                Ok(_) => {}
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping malformed audit line"
                ),
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEvent, RequestContext};
    use chrono::Duration;

    fn record(action: &str, at: DateTime<Utc>) -> AuditRecord {
        AuditEvent::new(action).into_record(&RequestContext::new("1.2.3.4", "test"), at)
    }

    #[test]
    fn test_in_memory_since_filters_by_time() {
        let store = InMemoryAuditStore::new();
        let now = Utc::now();
        store.append(&record("old", now - Duration::hours(3))).unwrap();
        store.append(&record("new", now)).unwrap();

        let recent = store.since(now - Duration::hours(1)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].action, "new");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_jsonl_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlAuditStore::new(dir.path().join("audit.jsonl"));
        let now = Utc::now();

        assert!(store.since(now).unwrap().is_empty());

        store.append(&record("auth.login_failed", now)).unwrap();
        store.append(&record("access_denied", now)).unwrap();

        let all = store.since(now - Duration::minutes(1)).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].action, "auth.login_failed");
        assert_eq!(all[1].ip_address, "1.2.3.4");
    }

    #[test]
    fn test_jsonl_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let store = JsonlAuditStore::new(&path);
        let now = Utc::now();
        store.append(&record("create", now)).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "not json").unwrap();
        store.append(&record("delete", now)).unwrap();

        let all = store.since(now - Duration::minutes(1)).unwrap();
        assert_eq!(all.iter().map(|r| r.action.as_str()).collect::<Vec<_>>(), ["create", "delete"]);
    }
}
