// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Recovery Engine - Rust Core Library
//!
//! Stuck-position recovery subsystem for the futures trading system. A
//! position is "stuck" when an exit was required but the position never
//! went flat: broker rejection, timeouts, thin liquidity, or divergence
//! between the bot's ledger and the broker's authoritative state.
//!
//! # Architecture
//!
//! Three cooperating layers share the position ledger and the
//! under-recovery registry, injected by construction:
//!
//! - **Layer 1** - [`reconciler::PositionReconciler`]: periodic diff of the
//!   ledger against the broker. Ghost positions go to the executor,
//!   phantoms are cleared, mismatches are overwritten broker-wins.
//! - **Layer 2** - [`monitor::StuckPositionMonitor`]: periodic
//!   classification of ledger positions (stuck exit, aged out, runaway
//!   loss) with duplicate-alert suppression.
//! - **Layer 3** - [`recovery::EmergencyExitExecutor`]: one concurrent
//!   escalation run per flagged position through five strictly-increasing
//!   levels, with crash-safe checkpoints and append-only incident records.
//!
//! The broker seam is the [`broker::BrokerGateway`] trait; the broker's
//! reported state wins over local belief on every conflict.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Outbound alert channels and the fan-out sink.
pub mod alerts;

/// Broker gateway trait, types, and mock.
pub mod broker;

/// Configuration loading and per-component config structs.
pub mod config;

/// Incident archive and recovery checkpoints.
pub mod incidents;

/// The shared position ledger.
pub mod ledger;

/// Core domain models.
pub mod models;

/// Layer 2: stuck-position classification.
pub mod monitor;

/// Layer 1: ledger/broker reconciliation.
pub mod reconciler;

/// Layer 3: the escalation state machine.
pub mod recovery;

/// Close-only mode and the global kill flag.
pub mod safety;

pub use alerts::{AlertSink, Notifier, Severity};
pub use broker::{BrokerGateway, MockBrokerGateway};
pub use config::{Config, load_config};
pub use incidents::{IncidentStore, RecoveryCheckpoint};
pub use ledger::PositionLedger;
pub use models::{Position, StuckAlert, StuckClassification};
pub use monitor::StuckPositionMonitor;
pub use reconciler::PositionReconciler;
pub use recovery::{
    EmergencyExitExecutor, EscalationLevel, RecoveryIncident, RecoveryOutcome, RecoveryRegistry,
};
pub use safety::{SafetySwitch, TradingSafetySwitch};
