//! The redb database shared by the document collections and the ledger.
//!
//! A redb file may only be opened once per process, so `Store` owns the
//! handle and lends it to [`DocStore`] and [`RedbLedger`] through an `Arc`.

pub mod documents;
pub mod index;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::Database;

use crate::error::Result;
use crate::ledger::RedbLedger;

pub use documents::{DocStore, Document, Filter, Update, ID_FIELD};
pub use index::{IndexKey, IndexKind, IndexSpec};

#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    path: PathBuf,
}

impl Store {
    /// Open or create the database at `path`, creating parent directories.
    ///
    /// The document tables are created eagerly; the ledger table is created
    /// by the ledger on its first write.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            crate::io::ensure_dir(parent)?;
        }
        let db = Database::create(path)?;
        let wt = db.begin_write()?;
        wt.open_table(documents::COLLECTIONS)?;
        wt.open_table(documents::DOCUMENTS)?;
        wt.commit()?;
        tracing::debug!(path = %path.display(), "store opened");
        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn documents(&self) -> DocStore {
        DocStore::new(Arc::clone(&self.db))
    }

    pub fn ledger(&self, table: impl Into<String>) -> RedbLedger {
        RedbLedger::new(Arc::clone(&self.db), table)
    }
}
