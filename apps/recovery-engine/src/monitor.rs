//! Stuck-position monitoring.
//!
//! Layer 2 of the recovery subsystem. Every scan classifies each ledger
//! position that is not already under recovery, in fixed precedence order
//! (first hit wins; the order affects only the logged reason since every
//! classification routes to the same executor):
//!
//! 1. **StuckExit** - the last exit attempt failed or was rejected long
//!    enough ago, with no newer attempt inside the quiet window.
//! 2. **AgedOut** - the position exceeded its (per-strategy) maximum age.
//! 3. **RunawayLoss** - unrealized P&L breached the loss threshold.
//!
//! A bounded known-stuck set suppresses duplicate alerts between scans; a
//! symbol leaves the set as soon as it stops classifying as stuck.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::BrokerGateway;
use crate::config::MonitorConfig;
use crate::ledger::PositionLedger;
use crate::models::{ExitAttemptState, Position, StuckAlert, StuckClassification};
use crate::recovery::EmergencyExitExecutor;

/// Bounded set remembering which symbols were already flagged.
#[derive(Debug, Default)]
struct KnownStuck {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl KnownStuck {
    fn insert(&mut self, symbol: &str, capacity: usize) {
        if self.members.insert(symbol.to_string()) {
            self.order.push_back(symbol.to_string());
            while self.order.len() > capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.members.remove(&evicted);
                }
            }
        }
    }

    fn remove(&mut self, symbol: &str) {
        if self.members.remove(symbol) {
            self.order.retain(|s| s != symbol);
        }
    }

    fn contains(&self, symbol: &str) -> bool {
        self.members.contains(symbol)
    }
}

/// Periodically classifies ledger positions and starts recoveries.
pub struct StuckPositionMonitor<B: BrokerGateway + 'static> {
    config: MonitorConfig,
    ledger: Arc<PositionLedger>,
    executor: Arc<EmergencyExitExecutor<B>>,
    known_stuck: Mutex<KnownStuck>,
}

impl<B: BrokerGateway + 'static> StuckPositionMonitor<B> {
    /// Create a monitor.
    #[must_use]
    pub fn new(
        config: MonitorConfig,
        ledger: Arc<PositionLedger>,
        executor: Arc<EmergencyExitExecutor<B>>,
    ) -> Self {
        Self {
            config,
            ledger,
            executor,
            known_stuck: Mutex::new(KnownStuck::default()),
        }
    }

    /// Scan all ledger positions once. Returns the number of recoveries
    /// started by this scan.
    pub fn scan_once(&self) -> usize {
        let now = Utc::now();
        let positions = self.ledger.get_all();
        let registry = self.executor.registry();
        let mut flagged = 0;

        let Ok(mut known) = self.known_stuck.lock() else {
            return 0;
        };

        for position in &positions {
            // Invariant: a position already under recovery is never enqueued.
            if registry.is_active(&position.symbol) {
                continue;
            }

            match self.classify(position, now) {
                Some((classification, reason)) => {
                    if known.contains(&position.symbol) {
                        continue;
                    }
                    known.insert(&position.symbol, self.config.known_stuck_capacity);

                    warn!(
                        symbol = %position.symbol,
                        classification = %classification,
                        reason = %reason,
                        "Stuck position detected"
                    );
                    let alert = StuckAlert {
                        position: position.clone(),
                        classification,
                        detected_at: now,
                        reason,
                    };
                    if self.executor.begin_recovery(alert) {
                        flagged += 1;
                    }
                }
                None => known.remove(&position.symbol),
            }
        }

        // Symbols gone from the ledger no longer need suppression.
        let tracked: HashSet<&str> = positions.iter().map(|p| p.symbol.as_str()).collect();
        let stale: Vec<String> = known
            .members
            .iter()
            .filter(|s| !tracked.contains(s.as_str()))
            .cloned()
            .collect();
        for symbol in stale {
            known.remove(&symbol);
        }

        flagged
    }

    /// Classification precedence: StuckExit > AgedOut > RunawayLoss.
    fn classify(
        &self,
        position: &Position,
        now: DateTime<Utc>,
    ) -> Option<(StuckClassification, String)> {
        if let Some(exit) = &position.last_exit {
            let failed = matches!(
                exit.state,
                ExitAttemptState::Failed | ExitAttemptState::Rejected
            );
            let attempt_age = now.signed_duration_since(exit.submitted_at).num_seconds();
            if failed
                && attempt_age >= self.config.stuck_exit_age_secs as i64
                && attempt_age >= self.config.stuck_exit_quiet_secs as i64
            {
                return Some((
                    StuckClassification::StuckExit,
                    format!(
                        "exit order {} {:?} {}s ago with no newer attempt",
                        exit.broker_order_id, exit.state, attempt_age
                    ),
                ));
            }
        }

        let max_age = self.config.max_age_for(position.strategy.as_deref());
        let age_secs = position.age(now).num_seconds();
        if age_secs >= max_age as i64 {
            return Some((
                StuckClassification::AgedOut,
                format!("position age {age_secs}s exceeds max {max_age}s"),
            ));
        }

        if position.unrealized_pnl <= self.config.runaway_loss_threshold {
            return Some((
                StuckClassification::RunawayLoss,
                format!(
                    "unrealized P&L {} breaches threshold {}",
                    position.unrealized_pnl, self.config.runaway_loss_threshold
                ),
            ));
        }

        None
    }

    /// Drive the periodic scan loop until shutdown.
    pub async fn run(&self, shutdown: CancellationToken) {
        if !self.config.enabled {
            info!("Stuck-position monitor disabled, skipping");
            return;
        }

        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.interval_secs));
        info!(
            interval_secs = self.config.interval_secs,
            "Stuck-position monitor started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let flagged = self.scan_once();
                    if flagged > 0 {
                        info!(flagged, "Scan handed positions to the executor");
                    }
                }
                () = shutdown.cancelled() => {
                    info!("Stuck-position monitor shutting down");
                    return;
                }
            }
        }
    }
}
