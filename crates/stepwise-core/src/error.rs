use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StepwiseError {
    #[error("duplicate unit identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("malformed unit '{identifier}': {reason}")]
    MalformedUnit { identifier: String, reason: String },

    #[error("unit source not found: {}", .0.display())]
    UnitSourceNotFound(PathBuf),

    #[error("unit already applied: {0}")]
    DuplicateApplication(String),

    #[error("unit not applied: {0}")]
    NotApplied(String),

    #[error("unit has no reverse operation: {0}")]
    NoReverseOperation(String),

    #[error("ledger references unknown units: {}", .0.join(", "))]
    UnknownUnits(Vec<String>),

    #[error("unit '{identifier}' failed to apply")]
    Apply {
        identifier: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unit '{identifier}' failed to roll back")]
    Rollback {
        identifier: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid config: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("invalid transition for '{identifier}' from {from} to {to}")]
    InvalidTransition {
        identifier: String,
        from: String,
        to: String,
    },

    #[error("collection already exists: {0}")]
    CollectionExists(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("index '{index}' already exists on {collection}")]
    IndexExists { collection: String, index: String },

    #[error("index '{index}' not found on {collection}")]
    IndexNotFound { collection: String, index: String },

    #[error("unique index '{index}' on {collection} violated by value {value}")]
    UniqueViolation {
        collection: String,
        index: String,
        value: String,
    },

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StepwiseError {
    /// The unit identifier this error is about, if any.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::DuplicateIdentifier(id)
            | Self::DuplicateApplication(id)
            | Self::NotApplied(id)
            | Self::NoReverseOperation(id) => Some(id),
            Self::MalformedUnit { identifier, .. }
            | Self::Apply { identifier, .. }
            | Self::Rollback { identifier, .. }
            | Self::InvalidTransition { identifier, .. } => Some(identifier),
            _ => None,
        }
    }
}

// redb reports failures through a family of distinct error types; they all
// collapse into `Store` with their display text.
macro_rules! store_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StepwiseError {
                fn from(e: $ty) -> Self {
                    StepwiseError::Store(e.to_string())
                }
            }
        )*
    };
}

store_error_from!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

pub type Result<T> = std::result::Result<T, StepwiseError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn unit_failure_chain_names_the_cause_once() {
        let source = Err::<(), _>(anyhow::anyhow!("collection already exists: e"))
            .context("step 1 (create_collection on e)")
            .unwrap_err();
        let err = StepwiseError::Apply {
            identifier: "002_b".to_string(),
            source,
        };
        assert_eq!(err.to_string(), "unit '002_b' failed to apply");
        let chain = format!("{:#}", anyhow::Error::new(err));
        assert_eq!(
            chain,
            "unit '002_b' failed to apply: step 1 (create_collection on e): collection already exists: e"
        );
    }
}
