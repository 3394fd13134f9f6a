//! A project directory: its config, its store, and its unit files.

use std::path::{Path, PathBuf};

use crate::config::{Config, WarnLevel};
use crate::error::{Result, StepwiseError};
use crate::ledger::RedbLedger;
use crate::registry::Registry;
use crate::runner::Runner;
use crate::store::{DocStore, Store};

pub struct Project {
    root: PathBuf,
    config: Config,
    database: PathBuf,
}

impl Project {
    /// Load the project rooted at `root`. `database` overrides the configured
    /// store location.
    pub fn load(root: &Path, database: Option<&Path>) -> Result<Self> {
        let config = Config::load(root)?;
        let database = match database {
            Some(path) => crate::paths::resolve(root, path),
            None => config.database_path(root),
        };
        Ok(Self {
            root: root.to_path_buf(),
            config,
            database,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database_path(&self) -> &Path {
        &self.database
    }

    pub fn migrations_path(&self) -> PathBuf {
        self.config.migrations_path(&self.root)
    }

    /// Fail on any error-level finding from [`Config::validate`].
    pub fn check_config(&self) -> Result<()> {
        let errors: Vec<String> = self
            .config
            .validate(&self.root)
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(StepwiseError::InvalidConfig(errors))
        }
    }

    pub fn load_registry(&self) -> Result<Registry<DocStore>> {
        Registry::from_dir(&self.migrations_path())
    }

    pub fn open_store(&self) -> Result<Store> {
        Store::open(&self.database)
    }
}

/// Everything a runner needs, opened together.
pub struct Session {
    documents: DocStore,
    ledger: RedbLedger,
    registry: Registry<DocStore>,
}

impl Session {
    /// Check the config, load the registry, then open the store. Config and
    /// registry errors surface before the store is touched.
    pub fn open(project: &Project) -> Result<Self> {
        project.check_config()?;
        let registry = project.load_registry()?;
        let store = project.open_store()?;
        tracing::debug!(
            units = registry.len(),
            database = %store.path().display(),
            ledger = %project.config().ledger_table,
            "session opened"
        );
        Ok(Self {
            documents: store.documents(),
            ledger: store.ledger(project.config().ledger_table.clone()),
            registry,
        })
    }

    pub fn registry(&self) -> &Registry<DocStore> {
        &self.registry
    }

    pub fn documents(&self) -> &DocStore {
        &self.documents
    }

    pub fn ledger(&self) -> &RedbLedger {
        &self.ledger
    }

    pub fn runner(&self) -> Runner<'_, DocStore, RedbLedger> {
        Runner::new(&self.registry, &self.ledger, &self.documents)
    }
}
