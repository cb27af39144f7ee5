//! Reconciler configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the ledger/broker position reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Enable the periodic reconciliation task.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Interval between reconciliation runs in seconds.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// How many run summaries to retain in memory.
    #[serde(default = "default_summary_history")]
    pub summary_history: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_interval(),
            summary_history: default_summary_history(),
        }
    }
}

const fn default_enabled() -> bool {
    true
}

const fn default_interval() -> u64 {
    60
}

const fn default_summary_history() -> usize {
    100
}
