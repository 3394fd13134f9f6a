//! Collections of JSON documents stored in redb.
//!
//! # Table design
//!
//! `_collections` maps a collection name to its JSON-encoded metadata
//! (creation time and index specs). `_documents` holds every document of
//! every collection under a composite key:
//! ```text
//! [ collection name bytes | 0x00 | uuid: 16 bytes ]
//! ```
//! All documents of one collection are therefore contiguous, and the range
//! `name\0 .. name\x01` returns exactly that collection.
//!
//! Unique indexes follow MongoDB: a document without the indexed field
//! holds `null` there for uniqueness purposes.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, StepwiseError};

use super::index::{IndexKey, IndexSpec};

pub(crate) const COLLECTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("_collections");
pub(crate) const DOCUMENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("_documents");

pub const ID_FIELD: &str = "_id";

pub type Document = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Filter / Update
// ---------------------------------------------------------------------------

/// Equality filter over (possibly dotted) field paths. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(pub Document);

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = Document::new();
        map.insert(field.into(), value.into());
        Self(map)
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.0
            .iter()
            .all(|(path, expected)| get_path(doc, path) == Some(expected))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub set: Document,
    #[serde(default)]
    pub unset: Vec<String>,
}

impl Update {
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::default().and_set(field, value)
    }

    pub fn unset(field: impl Into<String>) -> Self {
        Self::default().and_unset(field)
    }

    pub fn and_set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    pub fn and_unset(mut self, field: impl Into<String>) -> Self {
        self.unset.push(field.into());
        self
    }

    fn touches_id(&self) -> bool {
        self.set.keys().any(|k| k == ID_FIELD) || self.unset.iter().any(|k| k == ID_FIELD)
    }

    /// Apply to `doc`; returns whether anything changed.
    fn apply(&self, doc: &mut Document) -> bool {
        let mut changed = false;
        for (path, value) in &self.set {
            if get_path(doc, path) != Some(value) {
                set_path(doc, path, value.clone());
                changed = true;
            }
        }
        for path in &self.unset {
            changed |= unset_path(doc, path);
        }
        changed
    }
}

// ---------------------------------------------------------------------------
// Field path helpers
// ---------------------------------------------------------------------------

pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    match path.split_once('.') {
        None => doc.get(path),
        Some((head, rest)) => get_path(doc.get(head)?.as_object()?, rest),
    }
}

fn set_path(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            if !child.is_object() {
                *child = Value::Object(Document::new());
            }
            if let Value::Object(map) = child {
                set_path(map, rest, value);
            }
        }
    }
}

fn unset_path(doc: &mut Document, path: &str) -> bool {
    match path.split_once('.') {
        None => doc.remove(path).is_some(),
        Some((head, rest)) => match doc.get_mut(head) {
            Some(Value::Object(map)) => unset_path(map, rest),
            _ => false,
        },
    }
}

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn doc_key(collection: &str, id: Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(collection.len() + 17);
    key.extend_from_slice(collection.as_bytes());
    key.push(0);
    key.extend_from_slice(id.as_bytes());
    key
}

fn collection_bounds(collection: &str) -> (Vec<u8>, Vec<u8>) {
    let mut lower = collection.as_bytes().to_vec();
    let mut upper = lower.clone();
    lower.push(0);
    upper.push(1);
    (lower, upper)
}

fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('\0') {
        return Err(StepwiseError::Store(format!(
            "invalid collection name: {name:?}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Table readers (shared between read and write transactions)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionMeta {
    name: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    indexes: Vec<IndexSpec>,
}

impl CollectionMeta {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            created_at: Utc::now(),
            indexes: Vec::new(),
        }
    }
}

fn read_meta(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    name: &str,
) -> Result<Option<CollectionMeta>> {
    match table.get(name)? {
        Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
        None => Ok(None),
    }
}

fn read_docs(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    collection: &str,
) -> Result<Vec<(Vec<u8>, Document)>> {
    let (lower, upper) = collection_bounds(collection);
    let mut docs = Vec::new();
    for entry in table.range(lower.as_slice()..upper.as_slice())? {
        let (k, v) = entry?;
        docs.push((k.value().to_vec(), serde_json::from_slice(v.value())?));
    }
    Ok(docs)
}

/// Reject any single-field unique index whose values repeat across `docs`.
///
/// A missing field counts as `null`, so at most one document per unique
/// index may lack the field or hold `null` in it.
fn check_unique<'a>(
    meta: &CollectionMeta,
    docs: impl Iterator<Item = &'a Document> + Clone,
) -> Result<()> {
    for index in &meta.indexes {
        let Some(field) = index.unique_field() else {
            continue;
        };
        let mut seen = HashSet::new();
        for doc in docs.clone() {
            let rendered = get_path(doc, field).unwrap_or(&Value::Null).to_string();
            if !seen.insert(rendered.clone()) {
                return Err(StepwiseError::UniqueViolation {
                    collection: meta.name.clone(),
                    index: index.name.clone(),
                    value: rendered,
                });
            }
        }
    }
    Ok(())
}

fn into_document(collection: &str, value: Value) -> Result<(Uuid, Document)> {
    let Value::Object(mut doc) = value else {
        return Err(StepwiseError::Store(format!(
            "documents inserted into {collection} must be JSON objects"
        )));
    };
    let id = match doc.get(ID_FIELD) {
        None => Uuid::now_v7(),
        Some(Value::String(s)) => Uuid::parse_str(s)
            .map_err(|e| StepwiseError::Store(format!("invalid {ID_FIELD} {s:?}: {e}")))?,
        Some(other) => {
            return Err(StepwiseError::Store(format!(
                "{ID_FIELD} must be a UUID string, got {other}"
            )))
        }
    };
    doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    Ok((id, doc))
}

// ---------------------------------------------------------------------------
// DocStore
// ---------------------------------------------------------------------------

/// Document collections living in the shared store database.
#[derive(Clone)]
pub struct DocStore {
    db: Arc<Database>,
}

impl DocStore {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create_collection(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        let wt = self.db.begin_write()?;
        {
            let mut meta = wt.open_table(COLLECTIONS)?;
            if read_meta(&meta, name)?.is_some() {
                return Err(StepwiseError::CollectionExists(name.to_string()));
            }
            let value = serde_json::to_vec(&CollectionMeta::new(name))?;
            meta.insert(name, value.as_slice())?;
        }
        wt.commit()?;
        Ok(())
    }

    /// Remove a collection with all of its documents and indexes.
    /// Returns the number of documents removed.
    pub fn drop_collection(&self, name: &str) -> Result<usize> {
        let wt = self.db.begin_write()?;
        let removed = {
            let mut meta = wt.open_table(COLLECTIONS)?;
            if meta.remove(name)?.is_none() {
                return Err(StepwiseError::CollectionNotFound(name.to_string()));
            }
            let mut docs = wt.open_table(DOCUMENTS)?;
            let keys: Vec<Vec<u8>> = read_docs(&docs, name)?
                .into_iter()
                .map(|(k, _)| k)
                .collect();
            for key in &keys {
                docs.remove(key.as_slice())?;
            }
            keys.len()
        };
        wt.commit()?;
        Ok(removed)
    }

    pub fn collections(&self) -> Result<Vec<String>> {
        let rt = self.db.begin_read()?;
        let table = rt.open_table(COLLECTIONS)?;
        let mut names = Vec::new();
        for entry in table.iter()? {
            let (k, _) = entry?;
            names.push(k.value().to_string());
        }
        Ok(names)
    }

    pub fn has_collection(&self, name: &str) -> Result<bool> {
        let rt = self.db.begin_read()?;
        let table = rt.open_table(COLLECTIONS)?;
        Ok(read_meta(&table, name)?.is_some())
    }

    pub fn insert_one(&self, collection: &str, doc: Value) -> Result<Uuid> {
        let mut ids = self.insert_many(collection, vec![doc])?;
        ids.pop()
            .ok_or_else(|| StepwiseError::Store("insert returned no id".to_string()))
    }

    /// Insert documents, creating the collection if needed. Either every
    /// document is written or none are.
    pub fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<Uuid>> {
        validate_collection_name(collection)?;
        let prepared = docs
            .into_iter()
            .map(|d| into_document(collection, d))
            .collect::<Result<Vec<_>>>()?;

        let wt = self.db.begin_write()?;
        {
            let mut meta_table = wt.open_table(COLLECTIONS)?;
            let meta = match read_meta(&meta_table, collection)? {
                Some(meta) => meta,
                None => {
                    let meta = CollectionMeta::new(collection);
                    let value = serde_json::to_vec(&meta)?;
                    meta_table.insert(collection, value.as_slice())?;
                    meta
                }
            };

            let mut doc_table = wt.open_table(DOCUMENTS)?;
            let existing = read_docs(&doc_table, collection)?;
            let mut keys: HashSet<Vec<u8>> = existing.iter().map(|(k, _)| k.clone()).collect();
            for (id, _) in &prepared {
                if !keys.insert(doc_key(collection, *id)) {
                    return Err(StepwiseError::UniqueViolation {
                        collection: collection.to_string(),
                        index: "_id_".to_string(),
                        value: id.to_string(),
                    });
                }
            }
            check_unique(
                &meta,
                existing
                    .iter()
                    .map(|(_, d)| d)
                    .chain(prepared.iter().map(|(_, d)| d)),
            )?;

            for (id, doc) in &prepared {
                let value = serde_json::to_vec(doc)?;
                doc_table.insert(doc_key(collection, *id).as_slice(), value.as_slice())?;
            }
        }
        wt.commit()?;
        Ok(prepared.into_iter().map(|(id, _)| id).collect())
    }

    /// Documents matching `filter`. A missing collection yields no documents.
    pub fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        let rt = self.db.begin_read()?;
        let table = rt.open_table(DOCUMENTS)?;
        Ok(read_docs(&table, collection)?
            .into_iter()
            .map(|(_, d)| d)
            .filter(|d| filter.matches(d))
            .collect())
    }

    pub fn count(&self, collection: &str, filter: &Filter) -> Result<usize> {
        Ok(self.find(collection, filter)?.len())
    }

    /// Apply `update` to every matching document. Returns the number matched.
    pub fn update_many(&self, collection: &str, filter: &Filter, update: &Update) -> Result<usize> {
        if update.touches_id() {
            return Err(StepwiseError::Store(format!(
                "{ID_FIELD} cannot be modified"
            )));
        }
        let wt = self.db.begin_write()?;
        let matched = {
            let meta_table = wt.open_table(COLLECTIONS)?;
            let Some(meta) = read_meta(&meta_table, collection)? else {
                return Ok(0);
            };
            let mut doc_table = wt.open_table(DOCUMENTS)?;
            let mut docs = read_docs(&doc_table, collection)?;
            let mut matched = 0;
            let mut changed = Vec::new();
            for (i, (_, doc)) in docs.iter_mut().enumerate() {
                if filter.matches(doc) {
                    matched += 1;
                    if update.apply(doc) {
                        changed.push(i);
                    }
                }
            }
            check_unique(&meta, docs.iter().map(|(_, d)| d))?;
            for i in changed {
                let (key, doc) = &docs[i];
                let value = serde_json::to_vec(doc)?;
                doc_table.insert(key.as_slice(), value.as_slice())?;
            }
            matched
        };
        wt.commit()?;
        Ok(matched)
    }

    /// Create an index, creating the collection if needed. Returns its name.
    /// Re-creating an identical index is a no-op.
    pub fn create_index(&self, collection: &str, keys: Vec<IndexKey>, unique: bool) -> Result<String> {
        validate_collection_name(collection)?;
        if keys.is_empty() {
            return Err(StepwiseError::Store(format!(
                "index on {collection} needs at least one key"
            )));
        }
        let spec = IndexSpec::new(keys, unique);
        let name = spec.name.clone();

        let wt = self.db.begin_write()?;
        {
            let mut meta_table = wt.open_table(COLLECTIONS)?;
            let mut meta = read_meta(&meta_table, collection)?
                .unwrap_or_else(|| CollectionMeta::new(collection));
            if let Some(existing) = meta.indexes.iter().find(|i| i.name == name) {
                if *existing == spec {
                    return Ok(name);
                }
                return Err(StepwiseError::IndexExists {
                    collection: collection.to_string(),
                    index: name,
                });
            }
            meta.indexes.push(spec);
            let doc_table = wt.open_table(DOCUMENTS)?;
            let docs = read_docs(&doc_table, collection)?;
            check_unique(&meta, docs.iter().map(|(_, d)| d))?;

            let value = serde_json::to_vec(&meta)?;
            meta_table.insert(collection, value.as_slice())?;
        }
        wt.commit()?;
        Ok(name)
    }

    pub fn drop_index(&self, collection: &str, name: &str) -> Result<()> {
        self.modify_meta(collection, |meta| {
            let before = meta.indexes.len();
            meta.indexes.retain(|i| i.name != name);
            if meta.indexes.len() == before {
                return Err(StepwiseError::IndexNotFound {
                    collection: collection.to_string(),
                    index: name.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Drop every index on the collection. Returns how many were removed.
    pub fn drop_indexes(&self, collection: &str) -> Result<usize> {
        self.modify_meta(collection, |meta| Ok(std::mem::take(&mut meta.indexes).len()))
    }

    pub fn indexes(&self, collection: &str) -> Result<Vec<IndexSpec>> {
        let rt = self.db.begin_read()?;
        let table = rt.open_table(COLLECTIONS)?;
        read_meta(&table, collection)?
            .map(|m| m.indexes)
            .ok_or_else(|| StepwiseError::CollectionNotFound(collection.to_string()))
    }

    fn modify_meta<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut CollectionMeta) -> Result<T>,
    ) -> Result<T> {
        let wt = self.db.begin_write()?;
        let out = {
            let mut meta_table = wt.open_table(COLLECTIONS)?;
            let mut meta = read_meta(&meta_table, collection)?
                .ok_or_else(|| StepwiseError::CollectionNotFound(collection.to_string()))?;
            let out = f(&mut meta)?;
            let value = serde_json::to_vec(&meta)?;
            meta_table.insert(collection, value.as_slice())?;
            out
        };
        wt.commit()?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
