//! Escalation timing and order-handling configuration.

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Configuration for the 5-level emergency exit escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Level 1 (smart retry) timeout in seconds.
    #[serde(default = "default_level1_timeout")]
    pub level1_timeout_secs: u64,
    /// Level 2 (fresh start) timeout in seconds.
    #[serde(default = "default_level2_timeout")]
    pub level2_timeout_secs: u64,
    /// Level 3 (market order) timeout in seconds.
    #[serde(default = "default_level3_timeout")]
    pub level3_timeout_secs: u64,
    /// Level 4 (human escalation) timeout in seconds.
    #[serde(default = "default_level4_timeout")]
    pub level4_timeout_secs: u64,
    /// Level 5 fires this many seconds after recovery start, regardless of
    /// the level currently occupied. Level 5 itself never times out.
    #[serde(default = "default_level5_after")]
    pub level5_after_secs: u64,
    /// Flatness/fill poll cadence in milliseconds.
    #[serde(default = "default_fill_poll_interval")]
    pub fill_poll_interval_ms: u64,
    /// Market order resubmission cadence at levels 4 and 5, in seconds.
    #[serde(default = "default_market_retry_interval")]
    pub market_retry_interval_secs: u64,
    /// How long level 2 waits for cancel confirmations, in milliseconds.
    #[serde(default = "default_cancel_confirm_timeout")]
    pub cancel_confirm_timeout_ms: u64,
    /// Default contract tick size.
    #[serde(default = "default_tick_size")]
    pub default_tick_size: Decimal,
    /// Per-symbol tick size overrides.
    #[serde(default)]
    pub tick_size_overrides: HashMap<String, Decimal>,
    /// Multiplier applied to the tick for the level-1 stop-limit gap.
    #[serde(default = "default_stop_limit_gap_ticks")]
    pub stop_limit_gap_ticks: u32,
}

impl EscalationConfig {
    /// Tick size for a symbol.
    #[must_use]
    pub fn tick_size_for(&self, symbol: &str) -> Decimal {
        self.tick_size_overrides
            .get(symbol)
            .copied()
            .unwrap_or(self.default_tick_size)
    }

    /// Timeout duration for levels 1 through 4 (level 5 never times out).
    #[must_use]
    pub const fn level_timeout(&self, level: u8) -> Option<Duration> {
        match level {
            1 => Some(Duration::from_secs(self.level1_timeout_secs)),
            2 => Some(Duration::from_secs(self.level2_timeout_secs)),
            3 => Some(Duration::from_secs(self.level3_timeout_secs)),
            4 => Some(Duration::from_secs(self.level4_timeout_secs)),
            _ => None,
        }
    }

    /// Absolute level-5 trigger offset from recovery start.
    #[must_use]
    pub const fn level5_after(&self) -> Duration {
        Duration::from_secs(self.level5_after_secs)
    }

    /// Flatness poll cadence.
    #[must_use]
    pub const fn fill_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fill_poll_interval_ms)
    }

    /// Market retry cadence for levels 4 and 5.
    #[must_use]
    pub const fn market_retry_interval(&self) -> Duration {
        Duration::from_secs(self.market_retry_interval_secs)
    }

    /// Cancel confirmation wait for level 2.
    #[must_use]
    pub const fn cancel_confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_confirm_timeout_ms)
    }
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            level1_timeout_secs: default_level1_timeout(),
            level2_timeout_secs: default_level2_timeout(),
            level3_timeout_secs: default_level3_timeout(),
            level4_timeout_secs: default_level4_timeout(),
            level5_after_secs: default_level5_after(),
            fill_poll_interval_ms: default_fill_poll_interval(),
            market_retry_interval_secs: default_market_retry_interval(),
            cancel_confirm_timeout_ms: default_cancel_confirm_timeout(),
            default_tick_size: default_tick_size(),
            tick_size_overrides: HashMap::new(),
            stop_limit_gap_ticks: default_stop_limit_gap_ticks(),
        }
    }
}

const fn default_level1_timeout() -> u64 {
    30
}

const fn default_level2_timeout() -> u64 {
    30
}

const fn default_level3_timeout() -> u64 {
    60
}

const fn default_level4_timeout() -> u64 {
    180
}

const fn default_level5_after() -> u64 {
    300
}

const fn default_fill_poll_interval() -> u64 {
    1000
}

const fn default_market_retry_interval() -> u64 {
    10
}

const fn default_cancel_confirm_timeout() -> u64 {
    2000
}

fn default_tick_size() -> Decimal {
    Decimal::new(25, 2) // 0.25, the common index-future tick
}

const fn default_stop_limit_gap_ticks() -> u32 {
    4
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_escalation_config_defaults() {
        let config = EscalationConfig::default();
        assert_eq!(config.level1_timeout_secs, 30);
        assert_eq!(config.level2_timeout_secs, 30);
        assert_eq!(config.level3_timeout_secs, 60);
        assert_eq!(config.level4_timeout_secs, 180);
        assert_eq!(config.level5_after_secs, 300);
        assert_eq!(config.market_retry_interval_secs, 10);
        assert_eq!(config.default_tick_size, dec!(0.25));
    }

    #[test]
    fn test_level_timeout_lookup() {
        let config = EscalationConfig::default();
        assert_eq!(config.level_timeout(1), Some(Duration::from_secs(30)));
        assert_eq!(config.level_timeout(4), Some(Duration::from_secs(180)));
        assert_eq!(config.level_timeout(5), None);
    }

    #[test]
    fn test_tick_size_override() {
        let mut config = EscalationConfig::default();
        config
            .tick_size_overrides
            .insert("ZNZ6".to_string(), dec!(0.015625));

        assert_eq!(config.tick_size_for("ZNZ6"), dec!(0.015625));
        assert_eq!(config.tick_size_for("ESZ6"), dec!(0.25));
    }
}
