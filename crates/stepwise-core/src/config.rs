use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Project configuration, read from `stepwise.yaml` at the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Directory holding the unit files, relative to the root.
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    /// redb file holding both the documents and the ledger.
    #[serde(default = "default_database")]
    pub database: PathBuf,
    /// Name of the ledger table inside the database.
    #[serde(default = "default_ledger_table")]
    pub ledger_table: String,
}

fn default_version() -> u32 {
    1
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from(paths::DEFAULT_MIGRATIONS_DIR)
}

fn default_database() -> PathBuf {
    PathBuf::from(paths::DEFAULT_DATABASE)
}

fn default_ledger_table() -> String {
    "migrations".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            migrations_dir: default_migrations_dir(),
            database: default_database(),
            ledger_table: default_ledger_table(),
        }
    }
}

impl Config {
    /// Load `stepwise.yaml`, falling back to defaults when the file is absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn migrations_path(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.migrations_dir)
    }

    pub fn database_path(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.database)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self, root: &Path) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.version != 1 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("unsupported config version {}", self.version),
            });
        }

        if self.ledger_table.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "ledger_table must not be empty".to_string(),
            });
        } else if self.ledger_table.starts_with('_') {
            // Leading underscores are reserved for the document store's own tables.
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "ledger_table '{}' collides with reserved store tables",
                    self.ledger_table
                ),
            });
        }

        if !self.migrations_path(root).is_dir() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "migrations directory '{}' does not exist",
                    self.migrations_dir.display()
                ),
            });
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.ledger_table, "migrations");
        assert_eq!(
            cfg.database_path(dir.path()),
            dir.path().join(".stepwise/store.redb")
        );
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("stepwise.yaml"),
            "migrations_dir: db/units\n",
        )
        .unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.migrations_dir, PathBuf::from("db/units"));
        assert_eq!(cfg.ledger_table, "migrations");
        assert_eq!(cfg.version, 1);
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let cfg = Config {
            ledger_table: "schema_history".to_string(),
            ..Config::default()
        };
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.ledger_table, "schema_history");
    }

    #[test]
    fn validate_flags_reserved_table_and_missing_dir() {
        let dir = TempDir::new().unwrap();
        let cfg = Config {
            ledger_table: "_documents".to_string(),
            ..Config::default()
        };
        let warnings = cfg.validate(dir.path());
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("_documents")));
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("migrations")));
    }

    #[test]
    fn validate_clean_project() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("migrations")).unwrap();
        assert!(Config::default().validate(dir.path()).is_empty());
    }
}
