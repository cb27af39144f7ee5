//! Reconciliation run summaries.

use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-run diff counts.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileSummary {
    /// Symbols identical on both sides.
    pub matched: usize,
    /// Broker-only positions handed to the executor.
    pub ghost: usize,
    /// Ledger-only positions cleared.
    pub phantom: usize,
    /// Quantity/direction conflicts overwritten from broker.
    pub mismatch: usize,
    /// Symbols skipped because they were under recovery.
    pub skipped_recovering: usize,
    /// Run completion timestamp.
    pub completed_at: DateTime<Utc>,
    /// Run duration in milliseconds.
    pub duration_ms: u64,
}

/// Bounded in-memory log of recent run summaries.
#[derive(Debug)]
pub struct SummaryLog {
    entries: RwLock<VecDeque<ReconcileSummary>>,
    capacity: usize,
}

impl SummaryLog {
    /// Create a log retaining at most `capacity` summaries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a summary, evicting the oldest beyond capacity.
    pub fn push(&self, summary: ReconcileSummary) {
        if let Ok(mut entries) = self.entries.write() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(summary);
        }
    }

    /// Retained summaries, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<ReconcileSummary> {
        self.entries
            .read()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_summary(matched: usize) -> ReconcileSummary {
        ReconcileSummary {
            matched,
            ghost: 0,
            phantom: 0,
            mismatch: 0,
            skipped_recovering: 0,
            completed_at: Utc::now(),
            duration_ms: 1,
        }
    }

    #[test]
    fn test_summary_log_bounded() {
        let log = SummaryLog::new(2);
        log.push(make_summary(1));
        log.push(make_summary(2));
        log.push(make_summary(3));

        let recent = log.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].matched, 2);
        assert_eq!(recent[1].matched, 3);
    }
}
