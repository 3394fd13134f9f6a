//! Find unit files in a directory.
//!
//! Each `*.yaml` / `*.yml` file is one unit named by its file stem. Hidden
//! files and the directory's `index` entry point are never units; files
//! with other extensions are ignored.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, StepwiseError};
use crate::paths::INDEX_STEM;
use crate::script::Script;
use crate::store::DocStore;
use crate::unit::UnitDefinition;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UnitFile {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    up: Option<Script>,
    #[serde(default)]
    down: Option<Script>,
}

/// Load every unit file under `dir`, in file-name order.
///
/// Registry validation (identifier shape, forward presence, duplicates)
/// happens later; this only fails on unreadable files, files that do not
/// parse, and steps that fail [`Script::check`].
pub fn discover(dir: &Path) -> Result<Vec<UnitDefinition<DocStore>>> {
    if !dir.is_dir() {
        return Err(StepwiseError::UnitSourceNotFound(dir.to_path_buf()));
    }
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if is_unit_file(&path) {
            paths.push(path);
        } else {
            tracing::trace!(path = %path.display(), "skipping non-unit file");
        }
    }
    paths.sort();
    tracing::debug!(dir = %dir.display(), count = paths.len(), "discovered unit files");
    paths.iter().map(|p| load_unit_file(p)).collect()
}

fn is_unit_file(path: &Path) -> bool {
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    );
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    is_yaml && path.is_file() && !stem.starts_with('.') && stem != INDEX_STEM
}

fn load_unit_file(path: &Path) -> Result<UnitDefinition<DocStore>> {
    let identifier = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| StepwiseError::MalformedUnit {
            identifier: path.display().to_string(),
            reason: "file name is not valid UTF-8".to_string(),
        })?
        .to_string();
    let data = std::fs::read_to_string(path)?;
    let file: UnitFile = serde_yaml::from_str(&data).map_err(|e| StepwiseError::MalformedUnit {
        identifier: identifier.clone(),
        reason: format!("{}: {e}", path.display()),
    })?;

    for (name, script) in [("up", &file.up), ("down", &file.down)] {
        if let Some(reason) = script.as_ref().and_then(|s| s.check().err()) {
            return Err(StepwiseError::MalformedUnit {
                identifier,
                reason: format!("{}: {name}: {reason}", path.display()),
            });
        }
    }

    let mut def = UnitDefinition::new(identifier);
    def.description = file.description;
    def.origin = Some(path.to_path_buf());
    if let Some(up) = file.up.filter(|s| !s.is_empty()) {
        def = def.forward_op(up);
    }
    if let Some(down) = file.down {
        def = def.reverse_op(down);
    }
    Ok(def)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ADD_STATUS: &str = r#"
description: Add status field to events
up:
  - op: update_many
    collection: events
    set: { status: active }
down:
  - op: update_many
    collection: events
    unset: [status]
"#;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn discovers_yaml_units_and_skips_the_rest() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "002_add_event_status.yaml", ADD_STATUS);
        write(dir.path(), "001_initial.yml", "up:\n  - op: create_collection\n    collection: events\n");
        write(dir.path(), "index.yaml", "up: []\n");
        write(dir.path(), ".003_hidden.yaml", ADD_STATUS);
        write(dir.path(), "README.md", "# units\n");
        std::fs::create_dir(dir.path().join("004_dir.yaml")).unwrap();

        let defs = discover(dir.path()).unwrap();
        let ids: Vec<&str> = defs.iter().map(|d| d.identifier.as_str()).collect();
        assert_eq!(ids, ["001_initial", "002_add_event_status"]);

        assert!(defs[0].forward.is_some());
        assert!(defs[0].reverse.is_none());
        assert_eq!(
            defs[1].description.as_deref(),
            Some("Add status field to events")
        );
        assert!(defs[1].reverse.is_some());
        assert_eq!(
            defs[1].origin.as_deref(),
            Some(dir.path().join("002_add_event_status.yaml").as_path())
        );
    }

    #[test]
    fn missing_or_empty_up_leaves_forward_unset() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "001_no_up.yaml", "description: nothing here\n");
        write(dir.path(), "002_empty_up.yaml", "up: []\n");
        let defs = discover(dir.path()).unwrap();
        assert!(defs.iter().all(|d| d.forward.is_none()));
    }

    #[test]
    fn unparseable_file_is_malformed() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "001_typo.yaml", "upp:\n  - op: create_collection\n    collection: x\n");
        let err = discover(dir.path()).unwrap_err();
        assert!(matches!(err, StepwiseError::MalformedUnit { identifier, .. } if identifier == "001_typo"));
    }

    #[test]
    fn misspelled_step_field_is_malformed() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "002_add_event_status.yaml",
            &ADD_STATUS.replace("unset: [status]", "unsett: [status]"),
        );
        let err = discover(dir.path()).unwrap_err();
        match err {
            StepwiseError::MalformedUnit { identifier, reason } => {
                assert_eq!(identifier, "002_add_event_status");
                assert!(reason.contains("unsett"), "{reason}");
            }
            other => panic!("expected MalformedUnit, got {other:?}"),
        }
    }

    #[test]
    fn update_that_changes_nothing_is_malformed() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "002_noop_down.yaml",
            "up:\n  - op: create_collection\n    collection: events\ndown:\n  - op: update_many\n    collection: events\n",
        );
        let err = discover(dir.path()).unwrap_err();
        assert!(
            matches!(err, StepwiseError::MalformedUnit { ref reason, .. } if reason.contains("down: step 1 (update_many)")),
            "{err:?}"
        );
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = discover(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, StepwiseError::UnitSourceNotFound(_)));
    }
}
