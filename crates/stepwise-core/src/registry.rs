//! The ordered set of known change units.
//!
//! Units are ordered by the integer value of their numeric prefix, then by
//! the full identifier. For fixed-width prefixes this is the same as plain
//! lexicographic order; unlike it, `1000_x` still sorts after `999_y`.

use std::collections::HashSet;
use std::path::Path;

use crate::discovery;
use crate::error::{Result, StepwiseError};
use crate::store::DocStore;
use crate::unit::{ChangeUnit, UnitDefinition};

pub struct Registry<S> {
    units: Vec<ChangeUnit<S>>,
}

impl<S> Registry<S> {
    /// Validate and order `definitions`.
    ///
    /// Fails with `MalformedUnit` for a definition with no forward operation
    /// or a badly shaped identifier, and with `DuplicateIdentifier` when two
    /// definitions share an identifier. Either way no unit is returned.
    pub fn load(definitions: impl IntoIterator<Item = UnitDefinition<S>>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut units = Vec::new();
        for def in definitions {
            if !seen.insert(def.identifier.clone()) {
                return Err(StepwiseError::DuplicateIdentifier(def.identifier));
            }
            units.push(ChangeUnit::from_definition(def)?);
        }
        units.sort_by(|a, b| {
            a.sequence()
                .cmp(&b.sequence())
                .then_with(|| a.identifier().cmp(b.identifier()))
        });
        Ok(Self { units })
    }

    /// All units in execution order.
    pub fn list(&self) -> &[ChangeUnit<S>] {
        &self.units
    }

    pub fn get(&self, identifier: &str) -> Option<&ChangeUnit<S>> {
        self.units.iter().find(|u| u.identifier() == identifier)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.get(identifier).is_some()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|u| u.identifier())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl Registry<DocStore> {
    /// Discover unit files under `dir` and load them.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        Self::load(discovery::discover(dir)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn def(id: &str) -> UnitDefinition<()> {
        UnitDefinition::new(id).forward(|_: &()| Ok(()))
    }

    fn ids<S>(registry: &Registry<S>) -> Vec<&str> {
        registry.identifiers().collect()
    }

    #[test]
    fn orders_by_identifier_regardless_of_discovery_order() {
        let registry = Registry::load([def("003_x"), def("001_y"), def("002_z")]).unwrap();
        assert_eq!(ids(&registry), ["001_y", "002_z", "003_x"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn ordering_survives_prefixes_past_three_digits() {
        let registry = Registry::load([def("1000_late"), def("999_early"), def("0999_b")]).unwrap();
        assert_eq!(ids(&registry), ["0999_b", "999_early", "1000_late"]);
    }

    #[test]
    fn order_is_deterministic_across_loads() {
        let a = Registry::load([def("002_b"), def("001_a"), def("002_a")]).unwrap();
        let b = Registry::load([def("002_a"), def("002_b"), def("001_a")]).unwrap();
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(ids(&a), ["001_a", "002_a", "002_b"]);
    }

    #[test]
    fn duplicate_identifier_is_rejected() {
        let err = Registry::load([def("005_dup"), def("001_ok"), def("005_dup")])
            .err()
            .unwrap();
        assert!(matches!(err, StepwiseError::DuplicateIdentifier(id) if id == "005_dup"));
    }

    #[test]
    fn definition_without_forward_is_malformed() {
        let err = Registry::load([def("001_ok"), UnitDefinition::new("002_empty")])
            .err()
            .unwrap();
        assert!(matches!(err, StepwiseError::MalformedUnit { identifier, .. } if identifier == "002_empty"));
    }

    #[test]
    fn lookup_by_identifier() {
        let registry = Registry::load([def("001_a"), def("002_b")]).unwrap();
        assert!(registry.contains("002_b"));
        assert!(registry.get("003_c").is_none());
        assert!(!registry.is_empty());
    }

    #[test]
    fn from_dir_loads_unit_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("010_second.yaml"),
            "up:\n  - op: create_collection\n    collection: b\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("9_first.yaml"),
            "up:\n  - op: create_collection\n    collection: a\ndown:\n  - op: drop_collection\n    collection: a\n",
        )
        .unwrap();
        let registry = Registry::from_dir(dir.path()).unwrap();
        assert_eq!(ids(&registry), ["9_first", "010_second"]);
        assert!(registry.get("9_first").unwrap().is_reversible());
    }

    #[test]
    fn from_dir_rejects_same_stem_with_two_extensions() {
        let dir = TempDir::new().unwrap();
        let body = "up:\n  - op: create_collection\n    collection: a\n";
        std::fs::write(dir.path().join("005_dup.yaml"), body).unwrap();
        std::fs::write(dir.path().join("005_dup.yml"), body).unwrap();
        assert!(matches!(
            Registry::from_dir(dir.path()).err().unwrap(),
            StepwiseError::DuplicateIdentifier(_)
        ));
    }
}
