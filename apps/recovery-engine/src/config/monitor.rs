//! Stuck-position monitor configuration.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Configuration for the stuck-position monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Enable the periodic scan task.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Interval between scans in seconds.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Minimum age of a failed exit order before it counts as stuck, in seconds.
    #[serde(default = "default_stuck_exit_age")]
    pub stuck_exit_age_secs: u64,
    /// Quiet window: no newer exit attempt within this many seconds.
    #[serde(default = "default_stuck_exit_quiet")]
    pub stuck_exit_quiet_secs: u64,
    /// Maximum position age before it is flagged, in seconds.
    #[serde(default = "default_max_position_age")]
    pub max_position_age_secs: u64,
    /// Per-strategy overrides of the maximum position age.
    #[serde(default)]
    pub max_age_overrides: HashMap<String, u64>,
    /// Unrealized P&L at or below this flags the position (negative).
    #[serde(default = "default_runaway_loss_threshold")]
    pub runaway_loss_threshold: Decimal,
    /// Bound on the known-stuck suppression set.
    #[serde(default = "default_known_stuck_capacity")]
    pub known_stuck_capacity: usize,
}

impl MonitorConfig {
    /// Effective max age for a position given its strategy tag.
    #[must_use]
    pub fn max_age_for(&self, strategy: Option<&str>) -> u64 {
        strategy
            .and_then(|s| self.max_age_overrides.get(s).copied())
            .unwrap_or(self.max_position_age_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_interval(),
            stuck_exit_age_secs: default_stuck_exit_age(),
            stuck_exit_quiet_secs: default_stuck_exit_quiet(),
            max_position_age_secs: default_max_position_age(),
            max_age_overrides: HashMap::new(),
            runaway_loss_threshold: default_runaway_loss_threshold(),
            known_stuck_capacity: default_known_stuck_capacity(),
        }
    }
}

const fn default_enabled() -> bool {
    true
}

const fn default_interval() -> u64 {
    30
}

const fn default_stuck_exit_age() -> u64 {
    300 // 5 minutes
}

const fn default_stuck_exit_quiet() -> u64 {
    120 // 2 minutes
}

const fn default_max_position_age() -> u64 {
    14_400 // 4 hours
}

fn default_runaway_loss_threshold() -> Decimal {
    Decimal::new(-500, 0)
}

const fn default_known_stuck_capacity() -> usize {
    256
}
