//! Index metadata for document collections.
//!
//! Index names follow the `<field>_<kind>` convention joined by `_`, so a
//! single ascending key on `status` is named `status_1` and a compound text
//! index over `title` and `description` is `title_text_description_text`.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    #[default]
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "2dsphere")]
    Geo2dSphere,
}

impl IndexKind {
    /// Suffix used when deriving an index name.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Asc => "1",
            Self::Desc => "-1",
            Self::Text => "text",
            Self::Geo2dSphere => "2dsphere",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexKey {
    pub field: String,
    #[serde(default)]
    pub kind: IndexKind,
}

impl IndexKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: IndexKind::Asc,
        }
    }

    pub fn new(field: impl Into<String>, kind: IndexKind) -> Self {
        Self {
            field: field.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<IndexKey>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(keys: Vec<IndexKey>, unique: bool) -> Self {
        Self {
            name: index_name(&keys),
            keys,
            unique,
        }
    }

    /// Field whose values must be distinct, for single-key unique indexes.
    pub fn unique_field(&self) -> Option<&str> {
        match self.keys.as_slice() {
            [key] if self.unique => Some(key.field.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.unique {
            write!(f, " (unique)")?;
        }
        Ok(())
    }
}

pub fn index_name(keys: &[IndexKey]) -> String {
    keys.iter()
        .map(|k| format!("{}_{}", k.field, k.kind.suffix()))
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_field_kind_convention() {
        assert_eq!(index_name(&[IndexKey::asc("status")]), "status_1");
        assert_eq!(
            index_name(&[
                IndexKey::new("title", IndexKind::Text),
                IndexKey::new("location.name", IndexKind::Text),
            ]),
            "title_text_location.name_text"
        );
        assert_eq!(
            index_name(&[IndexKey::new("startDateTime", IndexKind::Desc)]),
            "startDateTime_-1"
        );
    }

    #[test]
    fn kind_defaults_to_ascending_when_omitted() {
        let key: IndexKey = serde_yaml::from_str("field: tags").unwrap();
        assert_eq!(key.kind, IndexKind::Asc);
        let geo: IndexKey =
            serde_yaml::from_str("field: location.coordinates\nkind: 2dsphere").unwrap();
        assert_eq!(geo.kind, IndexKind::Geo2dSphere);
    }

    #[test]
    fn only_single_key_unique_indexes_constrain_values() {
        assert_eq!(
            IndexSpec::new(vec![IndexKey::asc("email")], true).unique_field(),
            Some("email")
        );
        assert_eq!(
            IndexSpec::new(vec![IndexKey::asc("email")], false).unique_field(),
            None
        );
    }
}
