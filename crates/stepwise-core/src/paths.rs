use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "stepwise.yaml";
pub const STATE_DIR: &str = ".stepwise";
pub const DEFAULT_DATABASE: &str = ".stepwise/store.redb";
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// File stem of the entry point that may live next to unit files.
/// Discovery never treats it as a unit.
pub const INDEX_STEM: &str = "index";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

/// Resolve a configured path against the project root. Absolute paths pass through.
pub fn resolve(root: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        root.join(configured)
    }
}
