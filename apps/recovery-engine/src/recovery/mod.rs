//! Emergency exit escalation.
//!
//! This module owns layer 3 of the recovery subsystem:
//! - [`EscalationLevel`]: the five-level tagged union and its elapsed-time table
//! - [`RecoveryState`] / [`RecoveryRegistry`]: per-run state and the
//!   under-recovery set with compare-and-set begin semantics
//! - [`EmergencyExitExecutor`]: the timer-plus-fill-signal loop that drives
//!   one run per flagged position
//! - [`RecoveryIncident`]: the archival record written on termination

mod executor;
mod incident;
mod level;
mod state;

pub use executor::EmergencyExitExecutor;
pub use incident::RecoveryIncident;
pub use level::{EscalationLevel, deadline_offset, level_for_elapsed};
pub use state::{ActionRecord, RecoveryOutcome, RecoveryRegistry, RecoveryState};
