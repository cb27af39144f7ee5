//! Incident store configuration.

use serde::{Deserialize, Serialize};

/// Configuration for incident archival and recovery checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentsConfig {
    /// Directory for the incident archive and checkpoint file.
    #[serde(default = "default_dir")]
    pub dir: String,
}

impl Default for IncidentsConfig {
    fn default() -> Self {
        Self { dir: default_dir() }
    }
}

fn default_dir() -> String {
    "data/incidents".to_string()
}
