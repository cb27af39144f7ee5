//! Archival incident records for terminated recoveries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::StuckClassification;

use super::state::{ActionRecord, RecoveryOutcome, RecoveryState};
use super::EscalationLevel;

/// Immutable, append-only snapshot of a terminated recovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryIncident {
    /// Unique incident ID.
    pub incident_id: String,
    /// Position identity (symbol).
    pub position_id: String,
    /// Classification that started the run.
    pub classification: StuckClassification,
    /// Recovery start.
    pub started_at: DateTime<Utc>,
    /// Recovery end.
    pub ended_at: DateTime<Utc>,
    /// Highest level reached.
    pub final_level: EscalationLevel,
    /// Full ordered action history.
    pub actions: Vec<ActionRecord>,
    /// Terminal disposition.
    pub outcome: RecoveryOutcome,
    /// Aggregate slippage across market fills.
    pub slippage_cost: Decimal,
    /// Total run duration in seconds.
    pub duration_secs: i64,
}

impl RecoveryIncident {
    /// Archive a finished run.
    #[must_use]
    pub fn from_state(state: &RecoveryState, ended_at: DateTime<Utc>) -> Self {
        Self {
            incident_id: Uuid::new_v4().to_string(),
            position_id: state.position_id.clone(),
            classification: state.classification,
            started_at: state.started_at,
            ended_at,
            final_level: state.current_level,
            actions: state.actions.clone(),
            outcome: state.outcome,
            slippage_cost: state.slippage_cost,
            duration_secs: ended_at.signed_duration_since(state.started_at).num_seconds(),
        }
    }
}
