//! Change units: an identifier, a forward operation and an optional reverse.

use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StepwiseError};

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Something that mutates a target store of type `S`.
///
/// Implemented for plain closures and for declarative scripts loaded from
/// unit files.
pub trait Operation<S> {
    fn run(&self, store: &S) -> anyhow::Result<()>;
}

impl<S, F> Operation<S> for F
where
    F: Fn(&S) -> anyhow::Result<()>,
{
    fn run(&self, store: &S) -> anyhow::Result<()> {
        self(store)
    }
}

pub type BoxedOperation<S> = Box<dyn Operation<S>>;

// ---------------------------------------------------------------------------
// Identifier rules
// ---------------------------------------------------------------------------

static IDENTIFIER_RE: OnceLock<Regex> = OnceLock::new();

fn identifier_re() -> &'static Regex {
    IDENTIFIER_RE.get_or_init(|| Regex::new(r"^([0-9]+)[A-Za-z0-9_.\-]*$").unwrap())
}

/// Validate `identifier` and return its sequence number (the leading digits).
pub fn parse_sequence(identifier: &str) -> Result<u64> {
    let malformed = |reason: &str| StepwiseError::MalformedUnit {
        identifier: identifier.to_string(),
        reason: reason.to_string(),
    };
    let caps = identifier_re()
        .captures(identifier)
        .ok_or_else(|| malformed("identifier must start with a numeric prefix and use only [A-Za-z0-9_.-]"))?;
    caps[1]
        .parse::<u64>()
        .map_err(|_| malformed("numeric prefix does not fit in 64 bits"))
}

// ---------------------------------------------------------------------------
// UnitDefinition
// ---------------------------------------------------------------------------

/// A unit as found by discovery or registered by code, before validation.
///
/// A definition may lack a forward operation; the registry rejects such
/// definitions as malformed.
pub struct UnitDefinition<S> {
    pub identifier: String,
    pub description: Option<String>,
    pub forward: Option<BoxedOperation<S>>,
    pub reverse: Option<BoxedOperation<S>>,
    /// File the definition was read from, if any.
    pub origin: Option<PathBuf>,
}

impl<S> UnitDefinition<S> {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            description: None,
            forward: None,
            reverse: None,
            origin: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn forward<F>(self, f: F) -> Self
    where
        F: Fn(&S) -> anyhow::Result<()> + 'static,
    {
        self.forward_op(f)
    }

    pub fn reverse<F>(self, f: F) -> Self
    where
        F: Fn(&S) -> anyhow::Result<()> + 'static,
    {
        self.reverse_op(f)
    }

    pub fn forward_op(mut self, op: impl Operation<S> + 'static) -> Self {
        self.forward = Some(Box::new(op));
        self
    }

    pub fn reverse_op(mut self, op: impl Operation<S> + 'static) -> Self {
        self.reverse = Some(Box::new(op));
        self
    }
}

impl<S> fmt::Debug for UnitDefinition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitDefinition")
            .field("identifier", &self.identifier)
            .field("has_forward", &self.forward.is_some())
            .field("has_reverse", &self.reverse.is_some())
            .field("origin", &self.origin)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ChangeUnit
// ---------------------------------------------------------------------------

/// A validated, immutable change unit.
pub struct ChangeUnit<S> {
    identifier: String,
    sequence: u64,
    description: Option<String>,
    forward: BoxedOperation<S>,
    reverse: Option<BoxedOperation<S>>,
}

impl<S> ChangeUnit<S> {
    /// Validate a definition into a unit.
    pub fn from_definition(def: UnitDefinition<S>) -> Result<Self> {
        let sequence = parse_sequence(&def.identifier)?;
        let Some(forward) = def.forward else {
            return Err(StepwiseError::MalformedUnit {
                identifier: def.identifier,
                reason: "no forward operation".to_string(),
            });
        };
        Ok(Self {
            identifier: def.identifier,
            sequence,
            description: def.description,
            forward,
            reverse: def.reverse,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn is_reversible(&self) -> bool {
        self.reverse.is_some()
    }

    pub fn run_forward(&self, store: &S) -> anyhow::Result<()> {
        self.forward.run(store)
    }

    /// Run the reverse operation, or `None` for forward-only units.
    pub fn run_reverse(&self, store: &S) -> Option<anyhow::Result<()>> {
        self.reverse.as_ref().map(|op| op.run(store))
    }
}

impl<S> fmt::Debug for ChangeUnit<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeUnit")
            .field("identifier", &self.identifier)
            .field("sequence", &self.sequence)
            .field("reversible", &self.is_reversible())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// UnitState
// ---------------------------------------------------------------------------

/// Lifecycle of one unit.
///
/// Transitions: `Pending → Applying → Applied`, and only on an explicit
/// rollback `Applied → RollingBack → Pending`. A failed forward returns
/// `Applying → Pending`; a failed reverse returns `RollingBack → Applied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Applying,
    Applied,
    RollingBack,
}

impl UnitState {
    pub fn can_transition_to(self, next: UnitState) -> bool {
        use UnitState::*;
        matches!(
            (self, next),
            (Pending, Applying)
                | (Applying, Applied)
                | (Applying, Pending)
                | (Applied, RollingBack)
                | (RollingBack, Pending)
                | (RollingBack, Applied)
        )
    }

    pub fn transition(self, identifier: &str, next: UnitState) -> Result<UnitState> {
        if !self.can_transition_to(next) {
            return Err(StepwiseError::InvalidTransition {
                identifier: identifier.to_string(),
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        tracing::trace!(identifier, from = %self, to = %next, "unit state");
        Ok(next)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::RollingBack => "rolling_back",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn sequence_is_the_numeric_prefix() {
        assert_eq!(parse_sequence("001_add_index").unwrap(), 1);
        assert_eq!(parse_sequence("1000_late").unwrap(), 1000);
        assert_eq!(parse_sequence("20240101.seed-v2").unwrap(), 20240101);
    }

    #[test]
    fn identifiers_without_prefix_are_malformed() {
        for id in ["", "add_index", "_001", "001 add index", "001/../x"] {
            assert!(
                matches!(parse_sequence(id), Err(StepwiseError::MalformedUnit { .. })),
                "expected malformed: {id:?}"
            );
        }
    }

    #[test]
    fn definition_without_forward_is_rejected() {
        let def: UnitDefinition<()> = UnitDefinition::new("004_nothing");
        let err = ChangeUnit::from_definition(def).unwrap_err();
        assert!(matches!(err, StepwiseError::MalformedUnit { identifier, .. } if identifier == "004_nothing"));
    }

    #[test]
    fn closures_are_operations() {
        let log = RefCell::new(Vec::new());
        let unit = ChangeUnit::from_definition(
            UnitDefinition::new("001_x")
                .forward(|s: &RefCell<Vec<&'static str>>| {
                    s.borrow_mut().push("up");
                    Ok(())
                })
                .reverse(|s: &RefCell<Vec<&'static str>>| {
                    s.borrow_mut().push("down");
                    Ok(())
                }),
        )
        .unwrap();

        unit.run_forward(&log).unwrap();
        unit.run_reverse(&log).unwrap().unwrap();
        assert_eq!(*log.borrow(), ["up", "down"]);
        assert!(unit.is_reversible());
        assert_eq!(unit.sequence(), 1);
    }

    #[test]
    fn forward_only_unit_has_no_reverse() {
        let unit = ChangeUnit::from_definition(
            UnitDefinition::new("002_y").forward(|_: &()| Ok(())),
        )
        .unwrap();
        assert!(!unit.is_reversible());
        assert!(unit.run_reverse(&()).is_none());
    }

    #[test]
    fn state_machine_edges() {
        use UnitState::*;
        assert!(Pending.can_transition_to(Applying));
        assert!(Applying.can_transition_to(Applied));
        assert!(Applied.can_transition_to(RollingBack));
        assert!(RollingBack.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Applied));
        assert!(!Pending.can_transition_to(RollingBack));
        assert!(!Applied.can_transition_to(Applying));

        let err = Applied.transition("001_x", Applying).unwrap_err();
        assert!(err.to_string().contains("from applied to applying"));
    }
}
