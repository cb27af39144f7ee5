//! Stuck-position alerts handed from detection to the executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Position;

/// Why a position was flagged for recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StuckClassification {
    /// An exit order failed or was rejected without a timely retry.
    StuckExit,
    /// Position exceeded its maximum allowed age.
    AgedOut,
    /// Unrealized loss breached the runaway-loss threshold.
    RunawayLoss,
    /// Broker reports a position the ledger does not know about.
    Ghost,
}

impl std::fmt::Display for StuckClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StuckExit => write!(f, "stuck_exit"),
            Self::AgedOut => write!(f, "aged_out"),
            Self::RunawayLoss => write!(f, "runaway_loss"),
            Self::Ghost => write!(f, "ghost"),
        }
    }
}

/// Immutable alert created once by the monitor or reconciler and consumed
/// exactly once by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StuckAlert {
    /// Snapshot of the position at detection time.
    pub position: Position,
    /// Classification that triggered the alert.
    pub classification: StuckClassification,
    /// Detection timestamp.
    pub detected_at: DateTime<Utc>,
    /// Human-readable reason for the operator log.
    pub reason: String,
}
