//! Alert channel configuration.

use serde::{Deserialize, Serialize};

/// Configuration for outbound alert channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Always-on structured log channel.
    #[serde(default = "default_log_enabled")]
    pub log_enabled: bool,
    /// Webhook endpoints, one channel each.
    #[serde(default)]
    pub webhooks: Vec<String>,
    /// Per-request webhook timeout in milliseconds.
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_ms: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            log_enabled: default_log_enabled(),
            webhooks: Vec::new(),
            webhook_timeout_ms: default_webhook_timeout(),
        }
    }
}

const fn default_log_enabled() -> bool {
    true
}

const fn default_webhook_timeout() -> u64 {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alerts_config_defaults() {
        let config = AlertsConfig::default();
        assert!(config.log_enabled);
        assert!(config.webhooks.is_empty());
        assert_eq!(config.webhook_timeout_ms, 5000);
    }
}
