//! Declarative operations against a [`DocStore`].
//!
//! A unit file's `up` and `down` lists are each a [`Script`]: an ordered
//! list of [`Step`]s drawn from a fixed set of store operations.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::store::{DocStore, Document, Filter, IndexKey, Update};
use crate::unit::Operation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    CreateCollection {
        collection: String,
    },
    DropCollection {
        collection: String,
    },
    InsertMany {
        collection: String,
        documents: Vec<Value>,
    },
    UpdateMany {
        collection: String,
        #[serde(default)]
        filter: Filter,
        #[serde(default)]
        set: Document,
        #[serde(default)]
        unset: Vec<String>,
    },
    CreateIndex {
        collection: String,
        keys: Vec<IndexKey>,
        #[serde(default)]
        unique: bool,
    },
    DropIndex {
        collection: String,
        name: String,
    },
    DropIndexes {
        collection: String,
    },
}

impl Step {
    pub fn collection(&self) -> &str {
        match self {
            Self::CreateCollection { collection }
            | Self::DropCollection { collection }
            | Self::InsertMany { collection, .. }
            | Self::UpdateMany { collection, .. }
            | Self::CreateIndex { collection, .. }
            | Self::DropIndex { collection, .. }
            | Self::DropIndexes { collection } => collection,
        }
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            Self::CreateCollection { .. } => "create_collection",
            Self::DropCollection { .. } => "drop_collection",
            Self::InsertMany { .. } => "insert_many",
            Self::UpdateMany { .. } => "update_many",
            Self::CreateIndex { .. } => "create_index",
            Self::DropIndex { .. } => "drop_index",
            Self::DropIndexes { .. } => "drop_indexes",
        }
    }

    /// Reject steps that parse but could never change anything.
    pub fn check(&self) -> std::result::Result<(), String> {
        match self {
            Self::UpdateMany { set, unset, .. } if set.is_empty() && unset.is_empty() => {
                Err("update_many needs at least one field to set or unset".to_string())
            }
            Self::CreateIndex { keys, .. } if keys.is_empty() => {
                Err("create_index needs at least one key".to_string())
            }
            _ => Ok(()),
        }
    }

    pub fn execute(&self, docs: &DocStore) -> Result<()> {
        match self {
            Self::CreateCollection { collection } => docs.create_collection(collection),
            Self::DropCollection { collection } => docs.drop_collection(collection).map(drop),
            Self::InsertMany {
                collection,
                documents,
            } => docs.insert_many(collection, documents.clone()).map(drop),
            Self::UpdateMany {
                collection,
                filter,
                set,
                unset,
            } => {
                let update = Update {
                    set: set.clone(),
                    unset: unset.clone(),
                };
                let matched = docs.update_many(collection, filter, &update)?;
                tracing::debug!(collection = %collection, matched, "update_many");
                Ok(())
            }
            Self::CreateIndex {
                collection,
                keys,
                unique,
            } => docs.create_index(collection, keys.clone(), *unique).map(drop),
            Self::DropIndex { collection, name } => docs.drop_index(collection, name),
            Self::DropIndexes { collection } => docs.drop_indexes(collection).map(drop),
        }
    }
}

/// An ordered list of steps, run until the first failure.
///
/// Steps already executed when a later step fails are not undone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Script(pub Vec<Step>);

impl Script {
    pub fn steps(&self) -> &[Step] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Run [`Step::check`] over every step, naming the first offender.
    pub fn check(&self) -> std::result::Result<(), String> {
        for (i, step) in self.0.iter().enumerate() {
            step.check()
                .map_err(|reason| format!("step {} ({}): {reason}", i + 1, step.op_name()))?;
        }
        Ok(())
    }
}

impl Operation<DocStore> for Script {
    fn run(&self, store: &DocStore) -> anyhow::Result<()> {
        for (i, step) in self.0.iter().enumerate() {
            step.execute(store).with_context(|| {
                format!(
                    "step {} ({} on {})",
                    i + 1,
                    step.op_name(),
                    step.collection()
                )
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{IndexKind, Store};
    use serde_json::json;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, DocStore) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("script.redb")).unwrap();
        (dir, store.documents())
    }

    #[test]
    fn steps_parse_from_yaml() {
        let yaml = r#"
- op: update_many
  collection: events
  set:
    status: active
- op: create_index
  collection: events
  keys:
    - field: title
      kind: text
    - field: description
      kind: text
- op: drop_index
  collection: events
  name: status_1
"#;
        let script: Script = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(script.steps().len(), 3);
        match &script.steps()[0] {
            Step::UpdateMany {
                collection,
                filter,
                set,
                unset,
            } => {
                assert_eq!(collection, "events");
                assert_eq!(*filter, Filter::all());
                assert_eq!(set["status"], json!("active"));
                assert!(unset.is_empty());
            }
            other => panic!("expected update_many, got {other:?}"),
        }
        match &script.steps()[1] {
            Step::CreateIndex { keys, unique, .. } => {
                assert_eq!(keys[1], IndexKey::new("description", IndexKind::Text));
                assert!(!unique);
            }
            other => panic!("expected create_index, got {other:?}"),
        }
    }

    #[test]
    fn unknown_op_is_a_parse_error() {
        let yaml = "- op: truncate\n  collection: events\n";
        assert!(serde_yaml::from_str::<Script>(yaml).is_err());
    }

    #[test]
    fn misspelled_step_field_is_a_parse_error() {
        let yaml = "- op: update_many\n  collection: events\n  unsett: [status]\n";
        let err = serde_yaml::from_str::<Script>(yaml).unwrap_err();
        assert!(err.to_string().contains("unsett"), "{err}");
    }

    #[test]
    fn misspelled_index_key_field_is_a_parse_error() {
        let yaml = "- op: create_index\n  collection: events\n  keys:\n    - { field: title, knid: text }\n";
        assert!(serde_yaml::from_str::<Script>(yaml).is_err());
    }

    #[test]
    fn update_without_set_or_unset_fails_check() {
        let script = Script(vec![
            Step::CreateCollection {
                collection: "events".into(),
            },
            Step::UpdateMany {
                collection: "events".into(),
                filter: Filter::all(),
                set: Document::new(),
                unset: vec![],
            },
        ]);
        let reason = script.check().unwrap_err();
        assert!(reason.starts_with("step 2 (update_many)"), "{reason}");
    }

    #[test]
    fn index_without_keys_fails_check() {
        let step = Step::CreateIndex {
            collection: "events".into(),
            keys: vec![],
            unique: false,
        };
        assert!(step.check().is_err());
        assert!(Script(vec![]).check().is_ok());
    }

    #[test]
    fn script_runs_steps_in_order() {
        let (_dir, docs) = open_tmp();
        let script = Script(vec![
            Step::CreateCollection {
                collection: "categories".into(),
            },
            Step::InsertMany {
                collection: "categories".into(),
                documents: vec![json!({"slug": "music"}), json!({"slug": "art"})],
            },
            Step::CreateIndex {
                collection: "categories".into(),
                keys: vec![IndexKey::asc("slug")],
                unique: true,
            },
        ]);
        script.run(&docs).unwrap();
        assert_eq!(docs.count("categories", &Filter::all()).unwrap(), 2);
        assert_eq!(docs.indexes("categories").unwrap()[0].name, "slug_1");
    }

    #[test]
    fn failing_step_names_its_position() {
        let (_dir, docs) = open_tmp();
        let script = Script(vec![
            Step::CreateCollection {
                collection: "categories".into(),
            },
            Step::DropIndex {
                collection: "categories".into(),
                name: "missing_1".into(),
            },
        ]);
        let err = script.run(&docs).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("step 2 (drop_index on categories)"), "{msg}");
        assert!(msg.contains("missing_1"), "{msg}");
        // the first step is not undone
        assert!(docs.has_collection("categories").unwrap());
    }
}
