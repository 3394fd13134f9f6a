pub mod config;
pub mod discovery;
pub mod error;
pub mod io;
pub mod ledger;
pub mod paths;
pub mod project;
pub mod registry;
pub mod runner;
pub mod script;
pub mod store;
pub mod unit;

pub use error::{Result, StepwiseError};
pub use ledger::{Ledger, LedgerEntry, MemoryLedger, RedbLedger};
pub use registry::Registry;
pub use runner::{RunEvent, Runner, StatusReport, UnitStatus};
pub use unit::{ChangeUnit, Operation, UnitDefinition, UnitState};
