//! Configuration module for the recovery engine.
//!
//! Provides configuration loading, validation, and environment variable
//! interpolation for all recovery components.
//!
//! # Usage
//!
//! ```rust,ignore
//! use recovery_engine::config::load_config;
//!
//! // Load from default path (config.yaml)
//! let config = load_config(None)?;
//!
//! // Access configuration values
//! println!("monitor interval: {}s", config.monitor.interval_secs);
//! ```

mod alerts;
mod escalation;
mod incidents;
mod monitor;
mod reconciler;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use alerts::AlertsConfig;
pub use escalation::EscalationConfig;
pub use incidents::IncidentsConfig;
pub use monitor::MonitorConfig;
pub use reconciler::ReconcilerConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Reconciler configuration.
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    /// Stuck-position monitor configuration.
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Escalation timing configuration.
    #[serde(default)]
    pub escalation: EscalationConfig,
    /// Alert channel configuration.
    #[serde(default)]
    pub alerts: AlertsConfig,
    /// Incident store configuration.
    #[serde(default)]
    pub incidents: IncidentsConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    let interpolated = interpolate_env_vars(&contents);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;

    Ok(config)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let mut result = input.to_string();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    for cap in re.captures_iter(input) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let Some(var_match) = cap.get(1) else {
            continue;
        };
        let full_match = full_match.as_str();
        let var_name = var_match.as_str();
        let default_value = cap.get(2).map(|m| m.as_str());

        let value = match std::env::var(var_name) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.map_or_else(String::new, str::to_string),
        };

        result = result.replace(full_match, &value);
    }

    result
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.reconciler.interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "reconciler.interval_secs must be positive".to_string(),
        ));
    }

    if config.monitor.interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "monitor.interval_secs must be positive".to_string(),
        ));
    }

    if config.monitor.runaway_loss_threshold >= Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "monitor.runaway_loss_threshold must be negative".to_string(),
        ));
    }

    let esc = &config.escalation;
    for (name, secs) in [
        ("level1_timeout_secs", esc.level1_timeout_secs),
        ("level2_timeout_secs", esc.level2_timeout_secs),
        ("level3_timeout_secs", esc.level3_timeout_secs),
        ("level4_timeout_secs", esc.level4_timeout_secs),
        ("level5_after_secs", esc.level5_after_secs),
    ] {
        if secs == 0 {
            return Err(ConfigError::ValidationError(format!(
                "escalation.{name} must be positive"
            )));
        }
    }

    if esc.default_tick_size <= Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "escalation.default_tick_size must be positive".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.reconciler.enabled);
        assert_eq!(config.reconciler.interval_secs, 60);
        assert_eq!(config.monitor.interval_secs, 30);
        assert_eq!(config.escalation.level5_after_secs, 300);
        assert_eq!(config.logging.level, "info");
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_load_minimal_config() {
        let yaml = r"
monitor:
  interval_secs: 15
";
        let config = match load_config_from_string(yaml) {
            Ok(c) => c,
            Err(e) => panic!("should load minimal config: {e}"),
        };
        assert_eq!(config.monitor.interval_secs, 15);
        assert_eq!(config.reconciler.interval_secs, 60); // Default value
    }

    #[test]
    fn test_env_var_with_default_when_missing() {
        let input = "dir: ${RECOVERY_CONFIG_TEST_NONEXISTENT_VAR:-data/incidents}";
        let result = interpolate_env_vars(input);
        assert_eq!(result, "dir: data/incidents");
    }

    #[test]
    fn test_env_var_without_default_becomes_empty() {
        let input = "dir: ${RECOVERY_CONFIG_TEST_UNLIKELY_TO_EXIST}";
        let result = interpolate_env_vars(input);
        assert_eq!(result, "dir: ");
    }

    #[test]
    fn test_validation_zero_interval() {
        let yaml = r"
reconciler:
  interval_secs: 0
";
        let result = load_config_from_string(yaml);
        let Err(err) = result else {
            panic!("expected error for zero interval");
        };
        assert!(err.to_string().contains("interval_secs"));
    }

    #[test]
    fn test_validation_positive_loss_threshold() {
        let yaml = r"
monitor:
  runaway_loss_threshold: 500
";
        let result = load_config_from_string(yaml);
        let Err(err) = result else {
            panic!("expected error for positive threshold");
        };
        assert!(err.to_string().contains("runaway_loss_threshold"));
    }

    #[test]
    fn test_full_config_parse() {
        let yaml = r#"
reconciler:
  interval_secs: 45
  summary_history: 50

monitor:
  interval_secs: 20
  max_position_age_secs: 7200
  max_age_overrides:
    scalp: 900
  runaway_loss_threshold: -750

escalation:
  level1_timeout_secs: 15
  level3_timeout_secs: 90
  tick_size_overrides:
    ZNZ6: 0.015625

alerts:
  webhooks:
    - "https://hooks.example.com/desk"

incidents:
  dir: "/var/lib/recovery/incidents"

logging:
  level: "debug"
"#;
        let config = match load_config_from_string(yaml) {
            Ok(c) => c,
            Err(e) => panic!("should load full config: {e}"),
        };

        assert_eq!(config.reconciler.interval_secs, 45);
        assert_eq!(config.monitor.max_age_for(Some("scalp")), 900);
        assert_eq!(
            config.monitor.runaway_loss_threshold,
            Decimal::new(-750, 0)
        );
        assert_eq!(config.escalation.level1_timeout_secs, 15);
        assert_eq!(config.escalation.level3_timeout_secs, 90);
        assert_eq!(config.alerts.webhooks.len(), 1);
        assert_eq!(config.incidents.dir, "/var/lib/recovery/incidents");
        assert_eq!(config.logging.level, "debug");
    }
}
