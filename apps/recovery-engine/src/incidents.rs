//! Incident archive and recovery checkpoints.
//!
//! Two files under the configured directory:
//! - `incidents.jsonl`: one JSON line per terminated recovery, append-only,
//!   never rewritten. Read back only for the operator's recent-incident log.
//! - `active.json`: the set of in-flight recoveries, rewritten on every
//!   level transition and on shutdown. Read once on restart to resume
//!   unresolved runs; the effective level is always recomputed from the
//!   checkpoint's `started_at`, never from `last_known_level`.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::models::StuckClassification;
use crate::recovery::{EscalationLevel, RecoveryIncident};

/// Errors from the incident store.
#[derive(Debug, Error)]
pub enum IncidentStoreError {
    /// Filesystem failure.
    #[error("Incident store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure.
    #[error("Incident store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Persisted marker for one in-flight recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryCheckpoint {
    /// Position identity (symbol).
    pub position_id: String,
    /// Classification that started the run.
    pub classification: StuckClassification,
    /// Recovery start instant.
    pub started_at: DateTime<Utc>,
    /// Level occupied when the checkpoint was written. Informational only:
    /// restart recomputes the effective level from elapsed time.
    pub last_known_level: EscalationLevel,
}

/// File-backed incident archive and checkpoint set.
#[derive(Debug)]
pub struct IncidentStore {
    dir: PathBuf,
    active: Mutex<HashMap<String, RecoveryCheckpoint>>,
}

impl IncidentStore {
    /// Open (creating the directory if needed) and load any persisted
    /// checkpoints from a previous process.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or an existing
    /// checkpoint file cannot be parsed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, IncidentStoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let active_path = dir.join("active.json");
        let active = if active_path.exists() {
            let contents = std::fs::read_to_string(&active_path)?;
            if contents.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            dir,
            active: Mutex::new(active),
        })
    }

    /// Append one terminated recovery to the archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or appended.
    pub fn record(&self, incident: &RecoveryIncident) -> Result<(), IncidentStoreError> {
        let line = serde_json::to_string(incident)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.incidents_path())?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Persist (or refresh) the checkpoint for an in-flight recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint file cannot be rewritten.
    pub fn checkpoint(&self, checkpoint: RecoveryCheckpoint) -> Result<(), IncidentStoreError> {
        let snapshot = {
            let Ok(mut active) = self.active.lock() else {
                return Ok(());
            };
            active.insert(checkpoint.position_id.clone(), checkpoint);
            active.clone()
        };
        self.write_active(&snapshot)
    }

    /// Drop a terminated recovery's checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint file cannot be rewritten.
    pub fn remove_checkpoint(&self, position_id: &str) -> Result<(), IncidentStoreError> {
        let snapshot = {
            let Ok(mut active) = self.active.lock() else {
                return Ok(());
            };
            active.remove(position_id);
            active.clone()
        };
        self.write_active(&snapshot)
    }

    /// Checkpoints loaded from disk (restart path).
    #[must_use]
    pub fn checkpoints(&self) -> Vec<RecoveryCheckpoint> {
        self.active
            .lock()
            .map(|active| active.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Read back the newest `n` archived incidents.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive exists but cannot be read.
    pub fn recent_incidents(&self, n: usize) -> Result<Vec<RecoveryIncident>, IncidentStoreError> {
        let path = self.incidents_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(path)?);
        let mut incidents = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RecoveryIncident>(&line) {
                Ok(incident) => incidents.push(incident),
                // A torn final line from a crash mid-append is tolerated.
                Err(e) => warn!(error = %e, "Skipping unreadable incident record"),
            }
        }

        let skip = incidents.len().saturating_sub(n);
        Ok(incidents.split_off(skip))
    }

    fn incidents_path(&self) -> PathBuf {
        self.dir.join("incidents.jsonl")
    }

    fn write_active(
        &self,
        snapshot: &HashMap<String, RecoveryCheckpoint>,
    ) -> Result<(), IncidentStoreError> {
        let contents = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(self.dir.join("active.json"), contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StuckClassification;
    use crate::recovery::{RecoveryOutcome, RecoveryState};
    use rust_decimal_macros::dec;

    fn make_incident(symbol: &str) -> RecoveryIncident {
        let mut state = RecoveryState::new(
            symbol.to_string(),
            StuckClassification::Ghost,
            Utc::now() - chrono::Duration::seconds(40),
            EscalationLevel::FreshStart,
        );
        state.record("cancel_all", "1 canceled");
        state.outcome = RecoveryOutcome::Resolved;
        state.slippage_cost = dec!(0.50);
        RecoveryIncident::from_state(&state, Utc::now())
    }

    #[test]
    fn test_record_and_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let store = IncidentStore::open(tmp.path()).unwrap();

        store.record(&make_incident("ESZ6")).unwrap();
        store.record(&make_incident("NQZ6")).unwrap();

        let recent = store.recent_incidents(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].position_id, "ESZ6");
        assert_eq!(recent[1].position_id, "NQZ6");

        let last = store.recent_incidents(1).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].position_id, "NQZ6");
    }

    #[test]
    fn test_archive_is_append_only() {
        let tmp = tempfile::tempdir().unwrap();
        let store = IncidentStore::open(tmp.path()).unwrap();
        store.record(&make_incident("ESZ6")).unwrap();

        // Reopening and appending must not clobber earlier records.
        let store = IncidentStore::open(tmp.path()).unwrap();
        store.record(&make_incident("NQZ6")).unwrap();

        assert_eq!(store.recent_incidents(10).unwrap().len(), 2);
    }

    #[test]
    fn test_checkpoints_survive_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let started = Utc::now() - chrono::Duration::seconds(90);

        {
            let store = IncidentStore::open(tmp.path()).unwrap();
            store
                .checkpoint(RecoveryCheckpoint {
                    position_id: "ESZ6".to_string(),
                    classification: StuckClassification::StuckExit,
                    started_at: started,
                    last_known_level: EscalationLevel::MarketOrder,
                })
                .unwrap();
        }

        let store = IncidentStore::open(tmp.path()).unwrap();
        let checkpoints = store.checkpoints();
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].position_id, "ESZ6");
        assert_eq!(checkpoints[0].started_at, started);
    }

    #[test]
    fn test_remove_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let store = IncidentStore::open(tmp.path()).unwrap();
        store
            .checkpoint(RecoveryCheckpoint {
                position_id: "ESZ6".to_string(),
                classification: StuckClassification::AgedOut,
                started_at: Utc::now(),
                last_known_level: EscalationLevel::SmartRetry,
            })
            .unwrap();
        store.remove_checkpoint("ESZ6").unwrap();

        let store = IncidentStore::open(tmp.path()).unwrap();
        assert!(store.checkpoints().is_empty());
    }
}
