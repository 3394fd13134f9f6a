//! The applied-state ledger: which units have run, and when.
//!
//! # Table design
//!
//! `RedbLedger` keeps one table (named by config, `migrations` by default)
//! keyed by unit identifier with a JSON-encoded [`LedgerEntry`] as value.
//! The identifier key is the uniqueness constraint: `record_applied` checks
//! and inserts inside a single write transaction, and redb serializes write
//! transactions, so a second recording of the same identifier always fails
//! with `DuplicateApplication` instead of overwriting the first.
//!
//! The table does not exist until the first write. Reads against a missing
//! table see an empty ledger.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StepwiseError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub identifier: String,
    pub applied_at: DateTime<Utc>,
}

/// Durable record of applied units. Every mutating call has persisted its
/// effect by the time it returns `Ok`.
pub trait Ledger {
    /// Every entry, in identifier order.
    fn entries(&self) -> Result<Vec<LedgerEntry>>;

    /// Fails with `DuplicateApplication` if `identifier` is already recorded.
    fn record_applied(&self, identifier: &str, applied_at: DateTime<Utc>) -> Result<LedgerEntry>;

    /// Fails with `NotApplied` if `identifier` has no entry. Returns the removed entry.
    fn remove(&self, identifier: &str) -> Result<LedgerEntry>;

    fn get(&self, identifier: &str) -> Result<Option<LedgerEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .find(|e| e.identifier == identifier))
    }

    fn is_applied(&self, identifier: &str) -> Result<bool> {
        Ok(self.get(identifier)?.is_some())
    }

    fn applied(&self) -> Result<BTreeSet<String>> {
        Ok(self.entries()?.into_iter().map(|e| e.identifier).collect())
    }
}

// ---------------------------------------------------------------------------
// RedbLedger
// ---------------------------------------------------------------------------

pub struct RedbLedger {
    db: Arc<Database>,
    table: String,
}

impl RedbLedger {
    pub(crate) fn new(db: Arc<Database>, table: impl Into<String>) -> Self {
        Self {
            db,
            table: table.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    fn definition(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.table)
    }
}

impl Ledger for RedbLedger {
    fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let rt = self.db.begin_read()?;
        let table = match rt.open_table(self.definition()) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (_, v) = entry?;
            entries.push(serde_json::from_slice(v.value())?);
        }
        Ok(entries)
    }

    fn get(&self, identifier: &str) -> Result<Option<LedgerEntry>> {
        let rt = self.db.begin_read()?;
        let table = match rt.open_table(self.definition()) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match table.get(identifier)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    fn record_applied(&self, identifier: &str, applied_at: DateTime<Utc>) -> Result<LedgerEntry> {
        let entry = LedgerEntry {
            identifier: identifier.to_string(),
            applied_at,
        };
        let value = serde_json::to_vec(&entry)?;
        let wt = self.db.begin_write()?;
        {
            let mut table = wt.open_table(self.definition())?;
            if table.get(identifier)?.is_some() {
                return Err(StepwiseError::DuplicateApplication(identifier.to_string()));
            }
            table.insert(identifier, value.as_slice())?;
        }
        wt.commit()?;
        tracing::debug!(table = %self.table, identifier, "ledger entry recorded");
        Ok(entry)
    }

    fn remove(&self, identifier: &str) -> Result<LedgerEntry> {
        let wt = self.db.begin_write()?;
        let removed: LedgerEntry = {
            let mut table = wt.open_table(self.definition())?;
            let Some(v) = table.remove(identifier)? else {
                return Err(StepwiseError::NotApplied(identifier.to_string()));
            };
            let entry = serde_json::from_slice(v.value())?;
            entry
        };
        wt.commit()?;
        tracing::debug!(table = %self.table, identifier, "ledger entry removed");
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// MemoryLedger
// ---------------------------------------------------------------------------

/// Process-local ledger. Nothing survives the process; useful when the
/// caller persists applied state elsewhere, and in tests.
#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, DateTime<Utc>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Ledger for MemoryLedger {
    fn entries(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .lock()
            .iter()
            .map(|(identifier, applied_at)| LedgerEntry {
                identifier: identifier.clone(),
                applied_at: *applied_at,
            })
            .collect())
    }

    fn record_applied(&self, identifier: &str, applied_at: DateTime<Utc>) -> Result<LedgerEntry> {
        let mut entries = self.lock();
        if entries.contains_key(identifier) {
            return Err(StepwiseError::DuplicateApplication(identifier.to_string()));
        }
        entries.insert(identifier.to_string(), applied_at);
        Ok(LedgerEntry {
            identifier: identifier.to_string(),
            applied_at,
        })
    }

    fn remove(&self, identifier: &str) -> Result<LedgerEntry> {
        self.lock()
            .remove(identifier)
            .map(|applied_at| LedgerEntry {
                identifier: identifier.to_string(),
                applied_at,
            })
            .ok_or_else(|| StepwiseError::NotApplied(identifier.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use chrono::Duration;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("ledger.redb")).unwrap();
        (dir, store)
    }

    fn exercise(ledger: &dyn Ledger) {
        let t0 = Utc::now();
        assert!(ledger.entries().unwrap().is_empty());
        assert!(!ledger.is_applied("001_initial_schema").unwrap());

        ledger.record_applied("002_add_event_status", t0 + Duration::seconds(1)).unwrap();
        ledger.record_applied("001_initial_schema", t0).unwrap();

        let entries = ledger.entries().unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.identifier.as_str()).collect();
        assert_eq!(ids, ["001_initial_schema", "002_add_event_status"]);
        assert_eq!(entries[0].applied_at, t0);
        assert_eq!(
            ledger.applied().unwrap(),
            BTreeSet::from(["001_initial_schema".to_string(), "002_add_event_status".to_string()])
        );

        let dup = ledger.record_applied("001_initial_schema", Utc::now()).unwrap_err();
        assert!(matches!(dup, StepwiseError::DuplicateApplication(id) if id == "001_initial_schema"));
        // the original timestamp survives the rejected duplicate
        assert_eq!(ledger.get("001_initial_schema").unwrap().unwrap().applied_at, t0);

        let removed = ledger.remove("001_initial_schema").unwrap();
        assert_eq!(removed.applied_at, t0);
        assert!(!ledger.is_applied("001_initial_schema").unwrap());
        assert!(matches!(
            ledger.remove("001_initial_schema").unwrap_err(),
            StepwiseError::NotApplied(_)
        ));
    }

    #[test]
    fn memory_ledger_contract() {
        exercise(&MemoryLedger::new());
    }

    #[test]
    fn redb_ledger_contract() {
        let (_dir, store) = open_tmp();
        exercise(&store.ledger("migrations"));
    }

    #[test]
    fn redb_ledger_table_is_created_lazily() {
        let (_dir, store) = open_tmp();
        let ledger = store.ledger("schema_history");
        assert!(ledger.entries().unwrap().is_empty());
        assert!(ledger.get("001_x").unwrap().is_none());
        assert!(matches!(
            ledger.remove("001_x").unwrap_err(),
            StepwiseError::NotApplied(_)
        ));
        ledger.record_applied("001_x", Utc::now()).unwrap();
        assert!(ledger.is_applied("001_x").unwrap());
    }

    #[test]
    fn redb_ledgers_with_different_tables_are_independent() {
        let (_dir, store) = open_tmp();
        store.ledger("a").record_applied("001_x", Utc::now()).unwrap();
        assert!(!store.ledger("b").is_applied("001_x").unwrap());
        assert_eq!(store.ledger("a").table_name(), "a");
    }
}
