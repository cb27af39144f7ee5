//! Escalation levels and the elapsed-time level table.
//!
//! Levels advance strictly one at a time, never skipped, never reversed.
//! All timing derives from the recovery's start instant against the
//! cumulative per-level timeout table, which is what makes crash recovery
//! safe: a restarted run recomputes its effective level from elapsed
//! wall-clock time instead of trusting a persisted level.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::EscalationConfig;

/// One of the five recovery escalation levels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationLevel {
    /// Level 1: retry the original exit order more aggressively.
    SmartRetry,
    /// Level 2: cancel everything and submit a fresh exit.
    FreshStart,
    /// Level 3: unconditional market order.
    MarketOrder,
    /// Level 4: notify humans, keep hammering market orders.
    HumanEscalation,
    /// Level 5: close-only mode + kill flag; retries forever.
    SystemShutdown,
}

impl EscalationLevel {
    /// 1-based level number.
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            Self::SmartRetry => 1,
            Self::FreshStart => 2,
            Self::MarketOrder => 3,
            Self::HumanEscalation => 4,
            Self::SystemShutdown => 5,
        }
    }

    /// The next level, or `None` at level 5.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::SmartRetry => Some(Self::FreshStart),
            Self::FreshStart => Some(Self::MarketOrder),
            Self::MarketOrder => Some(Self::HumanEscalation),
            Self::HumanEscalation => Some(Self::SystemShutdown),
            Self::SystemShutdown => None,
        }
    }

    /// Whether this level resubmits market orders on a cadence.
    #[must_use]
    pub const fn retries_market_orders(self) -> bool {
        matches!(self, Self::HumanEscalation | Self::SystemShutdown)
    }
}

impl std::fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SmartRetry => "smart_retry",
            Self::FreshStart => "fresh_start",
            Self::MarketOrder => "market_order",
            Self::HumanEscalation => "human_escalation",
            Self::SystemShutdown => "system_shutdown",
        };
        write!(f, "level{}_{name}", self.index())
    }
}

/// Offset from recovery start at which a level's hold ends.
///
/// Levels 1-3 end at the cumulative sum of their timeouts. Level 4 ends at
/// the absolute level-5 trigger offset, and level 5 never ends.
#[must_use]
pub fn deadline_offset(config: &EscalationConfig, level: EscalationLevel) -> Option<Duration> {
    let t1 = Duration::from_secs(config.level1_timeout_secs);
    let t2 = Duration::from_secs(config.level2_timeout_secs);
    let t3 = Duration::from_secs(config.level3_timeout_secs);
    match level {
        EscalationLevel::SmartRetry => Some(t1),
        EscalationLevel::FreshStart => Some(t1 + t2),
        EscalationLevel::MarketOrder => Some(t1 + t2 + t3),
        EscalationLevel::HumanEscalation => Some(config.level5_after()),
        EscalationLevel::SystemShutdown => None,
    }
}

/// Effective level for a recovery that has been running for `elapsed`.
///
/// Used on restart: the persisted level is never trusted verbatim, so a
/// crash can neither regress a run to level 1 nor lose it.
#[must_use]
pub fn level_for_elapsed(config: &EscalationConfig, elapsed: Duration) -> EscalationLevel {
    if elapsed >= config.level5_after() {
        return EscalationLevel::SystemShutdown;
    }
    let boundaries = [
        (
            EscalationLevel::SmartRetry,
            Duration::from_secs(config.level1_timeout_secs),
        ),
        (
            EscalationLevel::FreshStart,
            Duration::from_secs(config.level1_timeout_secs + config.level2_timeout_secs),
        ),
        (
            EscalationLevel::MarketOrder,
            Duration::from_secs(
                config.level1_timeout_secs
                    + config.level2_timeout_secs
                    + config.level3_timeout_secs,
            ),
        ),
    ];
    for (level, boundary) in boundaries {
        if elapsed < boundary {
            return level;
        }
    }
    EscalationLevel::HumanEscalation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_strictly_increase() {
        let mut level = EscalationLevel::SmartRetry;
        let mut seen = vec![level];
        while let Some(next) = level.next() {
            assert_eq!(next.index(), level.index() + 1);
            level = next;
            seen.push(level);
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(level, EscalationLevel::SystemShutdown);
        assert!(level.next().is_none());
    }

    #[test]
    fn test_level_for_elapsed_default_table() {
        let config = EscalationConfig::default();
        // Defaults: 30 / 30 / 60 / 180, level 5 at 300.
        let cases = [
            (0, EscalationLevel::SmartRetry),
            (29, EscalationLevel::SmartRetry),
            (30, EscalationLevel::FreshStart),
            (59, EscalationLevel::FreshStart),
            (60, EscalationLevel::MarketOrder),
            (90, EscalationLevel::MarketOrder),
            (119, EscalationLevel::MarketOrder),
            (120, EscalationLevel::HumanEscalation),
            (299, EscalationLevel::HumanEscalation),
            (300, EscalationLevel::SystemShutdown),
            (4000, EscalationLevel::SystemShutdown),
        ];
        for (secs, expected) in cases {
            assert_eq!(
                level_for_elapsed(&config, Duration::from_secs(secs)),
                expected,
                "elapsed {secs}s"
            );
        }
    }

    #[test]
    fn test_level5_preempts_long_tables() {
        // A table whose lower levels outlast the level-5 trigger: the
        // absolute clock wins.
        let config = EscalationConfig {
            level1_timeout_secs: 400,
            ..EscalationConfig::default()
        };
        assert_eq!(
            level_for_elapsed(&config, Duration::from_secs(350)),
            EscalationLevel::SystemShutdown
        );
    }

    #[test]
    fn test_deadline_offsets() {
        let config = EscalationConfig::default();
        assert_eq!(
            deadline_offset(&config, EscalationLevel::SmartRetry),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            deadline_offset(&config, EscalationLevel::FreshStart),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            deadline_offset(&config, EscalationLevel::MarketOrder),
            Some(Duration::from_secs(120))
        );
        assert_eq!(
            deadline_offset(&config, EscalationLevel::HumanEscalation),
            Some(Duration::from_secs(300))
        );
        assert_eq!(deadline_offset(&config, EscalationLevel::SystemShutdown), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            EscalationLevel::MarketOrder.to_string(),
            "level3_market_order"
        );
        assert_eq!(
            EscalationLevel::SystemShutdown.to_string(),
            "level5_system_shutdown"
        );
    }
}
