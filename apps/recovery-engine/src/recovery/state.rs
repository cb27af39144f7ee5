//! Live recovery state and the under-recovery registry.

use std::collections::HashSet;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::StuckClassification;

use super::EscalationLevel;

/// Terminal disposition of a recovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryOutcome {
    /// Run still in flight.
    Pending,
    /// Position confirmed flat.
    Resolved,
    /// Run ended without reaching flat (process shutdown).
    Unresolved,
}

impl std::fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Resolved => write!(f, "resolved"),
            Self::Unresolved => write!(f, "unresolved"),
        }
    }
}

/// One entry in a recovery's ordered action log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Level the action belongs to.
    pub level: EscalationLevel,
    /// What was attempted.
    pub action: String,
    /// When it was attempted.
    pub at: DateTime<Utc>,
    /// Observed result ("submitted mock-3", "outcome unknown: ...").
    pub result: String,
}

/// Mutable state of one in-flight recovery run.
///
/// Exactly one live instance exists per position id; the registry's
/// compare-and-set `begin` enforces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryState {
    /// Position identity (symbol).
    pub position_id: String,
    /// Classification that started the run.
    pub classification: StuckClassification,
    /// Recovery start instant; all level timing derives from it.
    pub started_at: DateTime<Utc>,
    /// Level currently occupied.
    pub current_level: EscalationLevel,
    /// Ordered action log.
    pub actions: Vec<ActionRecord>,
    /// Terminal disposition.
    pub outcome: RecoveryOutcome,
    /// Aggregate slippage across market fills.
    pub slippage_cost: Decimal,
}

impl RecoveryState {
    /// Start a new run at the level implied by `started_at`.
    #[must_use]
    pub fn new(
        position_id: String,
        classification: StuckClassification,
        started_at: DateTime<Utc>,
        level: EscalationLevel,
    ) -> Self {
        Self {
            position_id,
            classification,
            started_at,
            current_level: level,
            actions: Vec::new(),
            outcome: RecoveryOutcome::Pending,
            slippage_cost: Decimal::ZERO,
        }
    }

    /// Append an action record at the current level.
    pub fn record(&mut self, action: impl Into<String>, result: impl Into<String>) {
        self.actions.push(ActionRecord {
            level: self.current_level,
            action: action.into(),
            at: Utc::now(),
            result: result.into(),
        });
    }

    /// Elapsed time since the run started.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        (Utc::now() - self.started_at)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

/// Guards the set of positions currently under recovery.
///
/// `begin` has compare-and-set semantics: at most one active run per
/// position id, and a position is either healthy or under recovery,
/// never both.
#[derive(Debug, Default)]
pub struct RecoveryRegistry {
    active: RwLock<HashSet<String>>,
}

impl RecoveryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a position for recovery. Returns false when a run is already
    /// active for it.
    pub fn begin(&self, position_id: &str) -> bool {
        self.active
            .write()
            .map(|mut active| active.insert(position_id.to_string()))
            .unwrap_or(false)
    }

    /// Release a position back to normal monitoring.
    pub fn finish(&self, position_id: &str) {
        if let Ok(mut active) = self.active.write() {
            active.remove(position_id);
        }
    }

    /// Whether a position is under recovery.
    #[must_use]
    pub fn is_active(&self, position_id: &str) -> bool {
        self.active
            .read()
            .map(|active| active.contains(position_id))
            .unwrap_or(false)
    }

    /// Symbols currently under recovery.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<String> {
        self.active
            .read()
            .map(|active| active.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of active runs.
    #[must_use]
    pub fn count(&self) -> usize {
        self.active.read().map(|active| active.len()).unwrap_or(0)
    }
}
