//! Position reconciliation against the broker.
//!
//! Layer 1 of the recovery subsystem. Every run diffs the position ledger
//! against the broker's authoritative open-position set:
//! - **Ghost** (broker only): hand a recovery alert to the executor; the
//!   ledger is not touched, the executor's eventual close reconciles it.
//! - **Phantom** (ledger only): clear the stale local record.
//! - **Mismatch** (quantity or direction differ): overwrite the ledger from
//!   the broker value. Broker state wins on every conflict.
//! - **Match**: nothing.
//!
//! Runs are independent and idempotent. A broker failure skips the whole
//! run (no partial writes) and the next tick retries; a crash only delays
//! detection.

mod report;

pub use report::{ReconcileSummary, SummaryLog};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::{BrokerError, BrokerGateway, BrokerPosition};
use crate::config::ReconcilerConfig;
use crate::ledger::PositionLedger;
use crate::models::{StuckAlert, StuckClassification};
use crate::recovery::EmergencyExitExecutor;

/// Errors from reconciliation runs.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Broker query failed; the run was skipped with no writes.
    #[error("Reconciliation skipped: {0}")]
    Broker(#[from] BrokerError),
}

/// Periodically converges the position ledger onto broker state.
pub struct PositionReconciler<B: BrokerGateway + 'static> {
    config: ReconcilerConfig,
    broker: Arc<B>,
    ledger: Arc<PositionLedger>,
    executor: Arc<EmergencyExitExecutor<B>>,
    summaries: SummaryLog,
}

impl<B: BrokerGateway + 'static> PositionReconciler<B> {
    /// Create a reconciler.
    #[must_use]
    pub fn new(
        config: ReconcilerConfig,
        broker: Arc<B>,
        ledger: Arc<PositionLedger>,
        executor: Arc<EmergencyExitExecutor<B>>,
    ) -> Self {
        let summaries = SummaryLog::new(config.summary_history);
        Self {
            config,
            broker,
            ledger,
            executor,
            summaries,
        }
    }

    /// Run a single reconciliation pass.
    ///
    /// # Errors
    ///
    /// Returns an error when the broker query fails; nothing is written in
    /// that case and the next tick retries.
    pub async fn reconcile_once(&self) -> Result<ReconcileSummary, ReconcileError> {
        let start = std::time::Instant::now();
        let broker_positions = self.broker.get_open_positions().await?;

        let broker_by_symbol: HashMap<&str, &BrokerPosition> = broker_positions
            .iter()
            .filter(|p| p.qty != rust_decimal::Decimal::ZERO)
            .map(|p| (p.symbol.as_str(), p))
            .collect();
        let ledger_positions = self.ledger.get_all();
        let registry = self.executor.registry();

        let mut matched = 0;
        let mut ghost = 0;
        let mut phantom = 0;
        let mut mismatch = 0;
        let mut skipped_recovering = 0;

        // Broker side: ghosts and mismatches.
        for (symbol, broker_pos) in &broker_by_symbol {
            match self.ledger.get(symbol) {
                None => {
                    ghost += 1;
                    warn!(
                        symbol = %symbol,
                        qty = %broker_pos.qty,
                        "Ghost position: broker holds it, ledger does not"
                    );
                    self.hand_ghost_to_executor(broker_pos);
                }
                Some(local) => {
                    if registry.is_active(symbol) {
                        skipped_recovering += 1;
                        continue;
                    }
                    if local.qty == broker_pos.qty {
                        matched += 1;
                    } else {
                        mismatch += 1;
                        warn!(
                            symbol = %symbol,
                            ledger_qty = %local.qty,
                            broker_qty = %broker_pos.qty,
                            "Position mismatch, overwriting ledger from broker"
                        );
                        self.ledger
                            .upsert(symbol, broker_pos.qty, broker_pos.avg_price);
                    }
                }
            }
        }

        // Ledger side: phantoms.
        for local in &ledger_positions {
            if broker_by_symbol.contains_key(local.symbol.as_str()) {
                continue;
            }
            if registry.is_active(&local.symbol) {
                skipped_recovering += 1;
                continue;
            }
            phantom += 1;
            info!(
                symbol = %local.symbol,
                qty = %local.qty,
                "Phantom position: ledger holds it, broker does not, clearing"
            );
            self.ledger.clear(&local.symbol);
        }

        let summary = ReconcileSummary {
            matched,
            ghost,
            phantom,
            mismatch,
            skipped_recovering,
            completed_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            matched = summary.matched,
            ghost = summary.ghost,
            phantom = summary.phantom,
            mismatch = summary.mismatch,
            duration_ms = summary.duration_ms,
            "Reconciliation completed"
        );
        self.summaries.push(summary.clone());

        Ok(summary)
    }

    /// Retained run summaries, oldest first.
    #[must_use]
    pub fn recent_summaries(&self) -> Vec<ReconcileSummary> {
        self.summaries.recent()
    }

    /// Drive the periodic reconciliation loop until shutdown.
    pub async fn run(&self, shutdown: CancellationToken) {
        if !self.config.enabled {
            info!("Reconciler disabled, skipping");
            return;
        }

        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.interval_secs));
        info!(
            interval_secs = self.config.interval_secs,
            "Reconciler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        warn!(error = %e, "Reconciliation run skipped, retrying next tick");
                    }
                }
                () = shutdown.cancelled() => {
                    info!("Reconciler shutting down");
                    return;
                }
            }
        }
    }

    /// Build a ghost alert and hand it to the executor. `begin_recovery` is
    /// idempotent, so re-detection across runs is harmless.
    fn hand_ghost_to_executor(&self, broker_pos: &BrokerPosition) {
        let now = Utc::now();
        let alert = StuckAlert {
            position: crate::models::Position {
                symbol: broker_pos.symbol.clone(),
                qty: broker_pos.qty,
                direction: crate::models::Direction::from_qty(broker_pos.qty),
                entry_price: broker_pos.avg_price,
                unrealized_pnl: rust_decimal::Decimal::ZERO,
                opened_at: now,
                strategy: None,
                last_exit: None,
            },
            classification: StuckClassification::Ghost,
            detected_at: now,
            reason: format!(
                "broker reports {} {} with no ledger record",
                broker_pos.qty, broker_pos.symbol
            ),
        };
        self.executor.begin_recovery(alert);
    }
}
