//! Apply and roll back change units against a target store.
//!
//! The runner holds no state of its own. Every call reads the registry for
//! what exists and the ledger for what has run, so a restarted process
//! picks up exactly where the ledger says the last one stopped.
//!
//! # Failure contract
//!
//! `apply` is not atomic as a batch. Each unit's forward operation followed
//! by its ledger entry is the unit of atomicity: when unit *n* fails, units
//! before it in the same run stay applied and recorded, unit *n* and every
//! later unit stay pending, and the error names unit *n*. Re-running after
//! fixing the cause resumes at unit *n*.
//!
//! A crash after a forward operation completes but before its ledger entry
//! is written leaves that unit pending, and the next run executes it again.
//! The same holds for two runners racing on one ledger: the loser's
//! `record_applied` fails with `DuplicateApplication`, which the runner
//! treats as "already applied" and skips, but its forward operation has
//! already run. Unit authors must keep forward operations safe to repeat at
//! that granularity; the engine does not make them so.
//!
//! Failures are returned to the caller and logged no louder than `info`.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{Result, StepwiseError};
use crate::ledger::{Ledger, LedgerEntry};
use crate::registry::Registry;
use crate::unit::{ChangeUnit, UnitState};

/// Progress of one unit during `apply_with`.
#[derive(Debug)]
pub enum RunEvent<'a> {
    Started {
        identifier: &'a str,
    },
    Applied {
        identifier: &'a str,
        applied_at: DateTime<Utc>,
    },
    /// Another runner recorded the unit between our read of the ledger and
    /// our write to it.
    Skipped {
        identifier: &'a str,
    },
    Failed {
        identifier: &'a str,
        error: &'a StepwiseError,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitStatus {
    pub identifier: String,
    pub description: Option<String>,
    pub state: UnitState,
    pub applied_at: Option<DateTime<Utc>>,
    pub reversible: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub units: Vec<UnitStatus>,
    /// Ledger entries whose unit is no longer in the registry.
    pub orphaned: Vec<LedgerEntry>,
}

impl StatusReport {
    pub fn applied_count(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.state == UnitState::Applied)
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.units.len() - self.applied_count()
    }
}

pub struct Runner<'a, S, L: ?Sized> {
    registry: &'a Registry<S>,
    ledger: &'a L,
    store: &'a S,
}

impl<'a, S, L: Ledger + ?Sized> Runner<'a, S, L> {
    pub fn new(registry: &'a Registry<S>, ledger: &'a L, store: &'a S) -> Self {
        Self {
            registry,
            ledger,
            store,
        }
    }

    /// Units in the registry without a ledger entry, in registry order.
    pub fn pending(&self) -> Result<Vec<&'a ChangeUnit<S>>> {
        let applied = self.ledger.applied()?;
        Ok(self
            .registry
            .list()
            .iter()
            .filter(|u| !applied.contains(u.identifier()))
            .collect())
    }

    /// Apply every pending unit in order. Returns the identifiers applied by
    /// this call.
    pub fn apply(&self) -> Result<Vec<String>> {
        self.apply_with(|_| {})
    }

    /// Like [`apply`](Self::apply), reporting each unit's progress to `observe`.
    pub fn apply_with(&self, mut observe: impl FnMut(RunEvent<'_>)) -> Result<Vec<String>> {
        let entries = self.ledger.entries()?;
        let unknown = self.unknown_entries(&entries);
        if !unknown.is_empty() {
            let ids: Vec<String> = unknown.into_iter().map(|e| e.identifier.clone()).collect();
            tracing::info!(units = ?ids, "ledger references units missing from the registry");
            return Err(StepwiseError::UnknownUnits(ids));
        }

        let applied: HashSet<&str> = entries.iter().map(|e| e.identifier.as_str()).collect();
        let mut last_applied = entries.iter().map(|e| e.applied_at).max();
        let pending: Vec<&ChangeUnit<S>> = self
            .registry
            .list()
            .iter()
            .filter(|u| !applied.contains(u.identifier()))
            .collect();

        if pending.is_empty() {
            tracing::info!("no pending units");
            return Ok(Vec::new());
        }
        tracing::info!(count = pending.len(), "applying pending units");

        let mut done = Vec::with_capacity(pending.len());
        for unit in pending {
            let identifier = unit.identifier();
            let state = UnitState::Pending.transition(identifier, UnitState::Applying)?;
            observe(RunEvent::Started { identifier });
            tracing::info!(identifier, "applying unit");

            if let Err(source) = unit.run_forward(self.store) {
                state.transition(identifier, UnitState::Pending)?;
                let err = StepwiseError::Apply {
                    identifier: identifier.to_string(),
                    source,
                };
                tracing::info!(identifier, error = %err, "unit failed, aborting run");
                observe(RunEvent::Failed {
                    identifier,
                    error: &err,
                });
                return Err(err);
            }

            let applied_at = next_timestamp(last_applied);
            match self.ledger.record_applied(identifier, applied_at) {
                Ok(entry) => {
                    state.transition(identifier, UnitState::Applied)?;
                    last_applied = Some(entry.applied_at);
                    tracing::info!(identifier, applied_at = %entry.applied_at, "unit applied");
                    observe(RunEvent::Applied {
                        identifier,
                        applied_at: entry.applied_at,
                    });
                    done.push(identifier.to_string());
                }
                Err(StepwiseError::DuplicateApplication(_)) => {
                    state.transition(identifier, UnitState::Applied)?;
                    tracing::warn!(identifier, "unit already recorded by another runner, skipping");
                    observe(RunEvent::Skipped { identifier });
                }
                Err(e) => {
                    state.transition(identifier, UnitState::Pending)?;
                    let err = StepwiseError::Apply {
                        identifier: identifier.to_string(),
                        source: anyhow::Error::new(e).context("recording ledger entry"),
                    };
                    tracing::info!(identifier, error = %err, "unit ran but was not recorded, aborting run");
                    observe(RunEvent::Failed {
                        identifier,
                        error: &err,
                    });
                    return Err(err);
                }
            }
        }

        tracing::info!(count = done.len(), "run complete");
        Ok(done)
    }

    /// Undo one applied unit and remove its ledger entry.
    ///
    /// The entry is only removed after the reverse operation succeeds; when
    /// it fails the unit stays applied.
    pub fn rollback(&self, identifier: &str) -> Result<LedgerEntry> {
        if self.ledger.get(identifier)?.is_none() {
            return Err(StepwiseError::NotApplied(identifier.to_string()));
        }
        let unit = self
            .registry
            .get(identifier)
            .ok_or_else(|| StepwiseError::UnknownUnits(vec![identifier.to_string()]))?;
        if !unit.is_reversible() {
            return Err(StepwiseError::NoReverseOperation(identifier.to_string()));
        }

        let state = UnitState::Applied.transition(identifier, UnitState::RollingBack)?;
        tracing::info!(identifier, "rolling back unit");
        if let Some(Err(source)) = unit.run_reverse(self.store) {
            state.transition(identifier, UnitState::Applied)?;
            let err = StepwiseError::Rollback {
                identifier: identifier.to_string(),
                source,
            };
            tracing::info!(identifier, error = %err, "rollback failed, ledger entry kept");
            return Err(err);
        }

        let removed = self.ledger.remove(identifier).map_err(|e| {
            tracing::info!(identifier, error = %e, "reverse ran but ledger entry was not removed");
            StepwiseError::Rollback {
                identifier: identifier.to_string(),
                source: anyhow::Error::new(e).context("removing ledger entry"),
            }
        })?;
        state.transition(identifier, UnitState::Pending)?;
        tracing::info!(identifier, "unit rolled back");
        Ok(removed)
    }

    /// Applied/pending state of every known unit. Never mutates anything.
    pub fn status(&self) -> Result<StatusReport> {
        let entries = self.ledger.entries()?;
        let units = self
            .registry
            .list()
            .iter()
            .map(|unit| {
                let entry = entries.iter().find(|e| e.identifier == unit.identifier());
                UnitStatus {
                    identifier: unit.identifier().to_string(),
                    description: unit.description().map(str::to_string),
                    state: if entry.is_some() {
                        UnitState::Applied
                    } else {
                        UnitState::Pending
                    },
                    applied_at: entry.map(|e| e.applied_at),
                    reversible: unit.is_reversible(),
                }
            })
            .collect();
        let orphaned = self.unknown_entries(&entries).into_iter().cloned().collect();
        Ok(StatusReport { units, orphaned })
    }

    fn unknown_entries<'e>(&self, entries: &'e [LedgerEntry]) -> Vec<&'e LedgerEntry> {
        entries
            .iter()
            .filter(|e| !self.registry.contains(&e.identifier))
            .collect()
    }
}

/// A timestamp for the next ledger entry, strictly after `previous`.
fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if now <= prev => prev + Duration::microseconds(1),
        _ => now,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
