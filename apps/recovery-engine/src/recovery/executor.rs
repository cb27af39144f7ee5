//! Emergency exit executor: one escalation run per stuck position.
//!
//! # Architecture
//!
//! ```text
//! begin_recovery(alert) ──► registry.begin (compare-and-set)
//!         │                        │ already active → no-op
//!         ▼
//!     spawned run ──► level entry action ──► hold (poll fills/flatness)
//!         │                ▲                      │ deadline → next level
//!         │                └──────────────────────┘
//!         └── flat ──► incident archived, ledger cleared, slot released
//! ```
//!
//! A single timer-plus-fill-signal loop drives each run. All deadlines are
//! offsets from the recovery's start instant, so a resumed run lands on the
//! level its elapsed time implies. Action submission failures are logged as
//! "outcome unknown" and never escalate early; the level timer alone
//! governs transitions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerts::{AlertSink, Severity};
use crate::broker::{BrokerError, BrokerGateway, OrderRequest};
use crate::config::EscalationConfig;
use crate::incidents::{IncidentStore, RecoveryCheckpoint};
use crate::ledger::PositionLedger;
use crate::models::{
    Direction, ExitAttempt, OrderSide, OrderStatus, OrderType, StuckAlert, StuckClassification,
};
use crate::safety::SafetySwitch;

use super::incident::RecoveryIncident;
use super::level::{EscalationLevel, deadline_offset, level_for_elapsed};
use super::state::{RecoveryOutcome, RecoveryRegistry, RecoveryState};

/// Inputs that outlive the alert for one escalation run.
struct RunContext {
    position_id: String,
    classification: StuckClassification,
    started_at: DateTime<Utc>,
    /// The bot's original failed exit order, when known (level 1 input).
    original_exit: Option<ExitAttempt>,
    /// Fallbacks when the broker position query fails mid-run.
    direction_hint: Direction,
    qty_hint: Decimal,
}

/// An outstanding market order whose fill is still being tracked.
struct MarketAttempt {
    broker_order_id: String,
    /// Mid price captured immediately before submission, for slippage.
    pre_mid: Option<Decimal>,
}

/// Why a level hold ended.
enum Hold {
    /// Position confirmed flat.
    Flat,
    /// Level deadline reached without flatness.
    Deadline,
    /// Process shutdown requested.
    Shutdown,
}

/// Drives 5-level escalating emergency exits, one concurrent run per
/// position under recovery.
///
/// The executor is a thin facade; the runner behind it is shared with every
/// spawned run task.
pub struct EmergencyExitExecutor<B: BrokerGateway + 'static> {
    runner: Arc<RecoveryRunner<B>>,
}

/// Collaborators and configuration shared by all escalation runs.
struct RecoveryRunner<B: BrokerGateway + 'static> {
    config: EscalationConfig,
    broker: Arc<B>,
    ledger: Arc<PositionLedger>,
    registry: Arc<RecoveryRegistry>,
    incidents: Arc<IncidentStore>,
    alerts: Arc<AlertSink>,
    safety: Arc<dyn SafetySwitch>,
    shutdown: CancellationToken,
}

impl<B: BrokerGateway + 'static> EmergencyExitExecutor<B> {
    /// Create an executor.
    #[allow(clippy::too_many_arguments)] // Construction-time dependency injection
    #[must_use]
    pub fn new(
        config: EscalationConfig,
        broker: Arc<B>,
        ledger: Arc<PositionLedger>,
        registry: Arc<RecoveryRegistry>,
        incidents: Arc<IncidentStore>,
        alerts: Arc<AlertSink>,
        safety: Arc<dyn SafetySwitch>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            runner: Arc::new(RecoveryRunner {
                config,
                broker,
                ledger,
                registry,
                incidents,
                alerts,
                safety,
                shutdown,
            }),
        }
    }

    /// The registry guarding the under-recovery set.
    #[must_use]
    pub fn registry(&self) -> &Arc<RecoveryRegistry> {
        &self.runner.registry
    }

    /// Begin a recovery run for an alert.
    ///
    /// Idempotent: returns false without side effects when a run is already
    /// active for the position.
    pub fn begin_recovery(&self, alert: StuckAlert) -> bool {
        let position_id = alert.position.symbol.clone();
        if !self.runner.registry.begin(&position_id) {
            debug!(position = %position_id, "Position already under recovery, ignoring alert");
            return false;
        }

        info!(
            position = %position_id,
            classification = %alert.classification,
            reason = %alert.reason,
            "Beginning recovery"
        );

        let ctx = RunContext {
            position_id,
            classification: alert.classification,
            started_at: Utc::now(),
            original_exit: alert.position.last_exit.clone(),
            direction_hint: alert.position.direction,
            qty_hint: alert.position.abs_qty(),
        };

        tokio::spawn(Arc::clone(&self.runner).run(ctx));
        true
    }

    /// Resume a run persisted by a previous process.
    ///
    /// The effective level is recomputed from the checkpoint's start
    /// instant; the persisted level is never trusted verbatim.
    pub fn resume(&self, checkpoint: &RecoveryCheckpoint) -> bool {
        if !self.runner.registry.begin(&checkpoint.position_id) {
            return false;
        }

        let elapsed = Utc::now()
            .signed_duration_since(checkpoint.started_at)
            .to_std()
            .unwrap_or_default();
        let level = level_for_elapsed(&self.runner.config, elapsed);
        info!(
            position = %checkpoint.position_id,
            persisted_level = %checkpoint.last_known_level,
            effective_level = %level,
            elapsed_secs = elapsed.as_secs(),
            "Resuming unresolved recovery from checkpoint"
        );

        let direction_hint = self
            .runner
            .ledger
            .get(&checkpoint.position_id)
            .map_or(Direction::Long, |p| p.direction);
        let ctx = RunContext {
            position_id: checkpoint.position_id.clone(),
            classification: checkpoint.classification,
            started_at: checkpoint.started_at,
            original_exit: None,
            direction_hint,
            qty_hint: Decimal::ZERO,
        };

        tokio::spawn(Arc::clone(&self.runner).run(ctx));
        true
    }
}

impl<B: BrokerGateway + 'static> RecoveryRunner<B> {
    // ========================================================================
    // Run loop
    // ========================================================================

    async fn run(self: Arc<Self>, ctx: RunContext) {
        let initial = level_for_elapsed(&self.config, Self::elapsed_since(ctx.started_at));
        let mut state = RecoveryState::new(
            ctx.position_id.clone(),
            ctx.classification,
            ctx.started_at,
            initial,
        );
        let mut safety_fired = false;
        let mut last_market: Option<MarketAttempt> = None;

        self.alerts
            .notify_all(
                Severity::Warning,
                &format!("Recovery started: {}", state.position_id),
                &format!(
                    "classification={} entry_level={}",
                    state.classification, state.current_level
                ),
            )
            .await;

        loop {
            self.persist_checkpoint(&state);
            info!(
                position = %state.position_id,
                level = %state.current_level,
                elapsed_secs = state.elapsed().as_secs(),
                "Entering escalation level"
            );

            self.enter_level(&ctx, &mut state, &mut last_market, &mut safety_fired)
                .await;

            match self
                .hold_level(&mut state, &ctx, &mut last_market, &mut safety_fired)
                .await
            {
                Hold::Flat => {
                    self.finish_resolved(&mut state).await;
                    return;
                }
                Hold::Deadline => {
                    if let Some(next) = state.current_level.next() {
                        info!(
                            position = %state.position_id,
                            from = %state.current_level,
                            to = %next,
                            elapsed_secs = state.elapsed().as_secs(),
                            "Level timed out without flatness, escalating"
                        );
                        state.current_level = next;
                    }
                }
                Hold::Shutdown => {
                    self.finish_suspended(&state);
                    return;
                }
            }
        }
    }

    /// Perform the level's entry action. Failures are contained here:
    /// an action that cannot be submitted leaves the level timer running.
    async fn enter_level(
        &self,
        ctx: &RunContext,
        state: &mut RecoveryState,
        last_market: &mut Option<MarketAttempt>,
        safety_fired: &mut bool,
    ) {
        match state.current_level {
            EscalationLevel::SmartRetry => self.action_smart_retry(ctx, state).await,
            EscalationLevel::FreshStart => self.action_fresh_start(ctx, state).await,
            EscalationLevel::MarketOrder => {
                self.action_market_order(ctx, state, last_market).await;
            }
            EscalationLevel::HumanEscalation => {
                self.alerts
                    .notify_all(
                        Severity::Critical,
                        &format!("Recovery escalated to level 4: {}", state.position_id),
                        &format!(
                            "Market order did not flatten {} within its window; \
                             elapsed={}s. Manual intervention may be required.",
                            state.position_id,
                            state.elapsed().as_secs()
                        ),
                    )
                    .await;
                state.record("notify_channels", "all channels notified");
                self.action_market_order(ctx, state, last_market).await;
            }
            EscalationLevel::SystemShutdown => {
                if !*safety_fired {
                    self.fire_safety(state).await;
                    *safety_fired = true;
                }
                self.action_market_order(ctx, state, last_market).await;
            }
        }
    }

    /// Hold the current level until flatness, its deadline, or shutdown.
    async fn hold_level(
        &self,
        state: &mut RecoveryState,
        ctx: &RunContext,
        last_market: &mut Option<MarketAttempt>,
        safety_fired: &mut bool,
    ) -> Hold {
        let deadline = deadline_offset(&self.config, state.current_level);
        let mut next_market_retry =
            tokio::time::Instant::now() + self.config.market_retry_interval();

        loop {
            self.settle_market_attempt(state, last_market).await;

            match self.is_flat(&state.position_id).await {
                Ok(true) => return Hold::Flat,
                Ok(false) => {}
                Err(e) => {
                    debug!(
                        position = %state.position_id,
                        error = %e,
                        "Flatness check failed, retrying next poll"
                    );
                }
            }

            // The level-5 clock is absolute: it fires at T+level5_after
            // regardless of the level currently occupied.
            if !*safety_fired && state.elapsed() >= self.config.level5_after() {
                self.fire_safety(state).await;
                *safety_fired = true;
            }

            if let Some(offset) = deadline {
                if state.elapsed() >= offset {
                    return Hold::Deadline;
                }
            }

            if state.current_level.retries_market_orders()
                && tokio::time::Instant::now() >= next_market_retry
            {
                self.action_market_order(ctx, state, last_market).await;
                next_market_retry =
                    tokio::time::Instant::now() + self.config.market_retry_interval();
            }

            tokio::select! {
                () = self.shutdown.cancelled() => return Hold::Shutdown,
                () = tokio::time::sleep(self.config.fill_poll_interval()) => {}
            }
        }
    }

    // ========================================================================
    // Level actions
    // ========================================================================

    /// Level 1: exactly one retry shaped by the original failed exit order.
    async fn action_smart_retry(&self, ctx: &RunContext, state: &mut RecoveryState) {
        let tick = self.config.tick_size_for(&ctx.position_id);

        let request = match &ctx.original_exit {
            Some(exit) if exit.order_type == OrderType::Limit => {
                let Some(original_price) = exit.limit_price else {
                    self.submit_limit_at_touch(ctx, state).await;
                    return;
                };
                let Some((qty, direction)) = self.remaining(ctx).await else {
                    state.record("resubmit_limit", "outcome unknown: no position data");
                    return;
                };
                let side = OrderSide::closing(direction);
                // One tick more aggressive: sells come down, buys go up.
                let price = match side {
                    OrderSide::Sell => original_price - tick,
                    OrderSide::Buy => original_price + tick,
                };
                self.exit_request(ctx, side, qty, OrderType::Limit, Some(price), None)
            }
            Some(exit)
                if matches!(exit.order_type, OrderType::Stop | OrderType::StopLimit)
                    && exit.stop_price.is_some() =>
            {
                let Some(stop) = exit.stop_price else {
                    return;
                };
                let Some((qty, direction)) = self.remaining(ctx).await else {
                    state.record("convert_stop_limit", "outcome unknown: no position data");
                    return;
                };
                let side = OrderSide::closing(direction);
                let gap = tick * Decimal::from(self.config.stop_limit_gap_ticks);
                // Wider limit gap than the default conversion, to survive
                // thin books.
                let limit = match side {
                    OrderSide::Sell => stop - gap,
                    OrderSide::Buy => stop + gap,
                };
                self.exit_request(ctx, side, qty, OrderType::StopLimit, Some(limit), Some(stop))
            }
            // No original exit to rework (ghosts, aged-out without an exit
            // attempt): a passive limit at the touch is the gentlest start.
            _ => {
                self.submit_limit_at_touch(ctx, state).await;
                return;
            }
        };

        self.submit_and_record(state, "smart_retry", &request).await;
    }

    /// Level 2: clean slate. Cancel everything working on the symbol, wait
    /// briefly for confirmations, then submit a spread-aware exit.
    async fn action_fresh_start(&self, ctx: &RunContext, state: &mut RecoveryState) {
        let canceled = self.cancel_symbol_orders(&ctx.position_id).await;
        state.record("cancel_all", format!("{canceled} cancel requests"));

        self.await_cancel_confirmations(&ctx.position_id).await;

        let quote = match self.broker.get_quote(&ctx.position_id).await {
            Ok(q) => q,
            Err(e) => {
                warn!(position = %ctx.position_id, error = %e, "Quote unavailable for fresh start");
                state.record("fresh_exit", format!("outcome unknown: {e}"));
                return;
            }
        };
        let Some((qty, direction)) = self.remaining(ctx).await else {
            state.record("fresh_exit", "outcome unknown: no position data");
            return;
        };

        let side = OrderSide::closing(direction);
        let tick = self.config.tick_size_for(&ctx.position_id);
        let price = if quote.spread() <= tick {
            // Tight market: a plain limit at our touch fills quickly.
            match side {
                OrderSide::Sell => quote.ask,
                OrderSide::Buy => quote.bid,
            }
        } else {
            // Wide market: marketable limit through the aggressive side.
            match side {
                OrderSide::Sell => quote.bid,
                OrderSide::Buy => quote.ask,
            }
        };

        let request = self.exit_request(ctx, side, qty, OrderType::Limit, Some(price), None);
        self.submit_and_record(state, "fresh_exit", &request).await;
    }

    /// Level 3+: cancel what's working and go to market for the full
    /// remaining quantity, capturing the pre-submission mid for slippage.
    async fn action_market_order(
        &self,
        ctx: &RunContext,
        state: &mut RecoveryState,
        last_market: &mut Option<MarketAttempt>,
    ) {
        self.cancel_symbol_orders(&ctx.position_id).await;

        let Some((qty, direction)) = self.remaining(ctx).await else {
            state.record("market_order", "outcome unknown: no position data");
            return;
        };
        let pre_mid = self
            .broker
            .get_quote(&ctx.position_id)
            .await
            .ok()
            .map(|q| q.mid());

        let request = self.exit_request(
            ctx,
            OrderSide::closing(direction),
            qty,
            OrderType::Market,
            None,
            None,
        );

        match self.broker.submit_order(&request).await {
            Ok(broker_order_id) => {
                info!(
                    position = %ctx.position_id,
                    order = %broker_order_id,
                    qty = %qty,
                    "Market exit submitted"
                );
                state.record("market_order", format!("submitted {broker_order_id}"));
                *last_market = Some(MarketAttempt {
                    broker_order_id,
                    pre_mid,
                });
            }
            Err(e) => {
                warn!(position = %ctx.position_id, error = %e, "Market exit failed to submit");
                state.record("market_order", format!("outcome unknown: {e}"));
            }
        }
    }

    async fn submit_limit_at_touch(&self, ctx: &RunContext, state: &mut RecoveryState) {
        let quote = match self.broker.get_quote(&ctx.position_id).await {
            Ok(q) => q,
            Err(e) => {
                state.record("limit_at_touch", format!("outcome unknown: {e}"));
                return;
            }
        };
        let Some((qty, direction)) = self.remaining(ctx).await else {
            state.record("limit_at_touch", "outcome unknown: no position data");
            return;
        };
        let side = OrderSide::closing(direction);
        let price = match side {
            OrderSide::Sell => quote.ask,
            OrderSide::Buy => quote.bid,
        };
        let request = self.exit_request(ctx, side, qty, OrderType::Limit, Some(price), None);
        self.submit_and_record(state, "limit_at_touch", &request).await;
    }

    // ========================================================================
    // Broker helpers
    // ========================================================================

    fn exit_request(
        &self,
        ctx: &RunContext,
        side: OrderSide,
        qty: Decimal,
        order_type: OrderType,
        limit_price: Option<Decimal>,
        stop_price: Option<Decimal>,
    ) -> OrderRequest {
        OrderRequest {
            client_order_id: format!("recovery-{}", Uuid::new_v4()),
            symbol: ctx.position_id.clone(),
            side,
            qty,
            order_type,
            limit_price,
            stop_price,
        }
    }

    async fn submit_and_record(
        &self,
        state: &mut RecoveryState,
        action: &str,
        request: &OrderRequest,
    ) {
        match self.broker.submit_order(request).await {
            Ok(broker_order_id) => {
                info!(
                    position = %state.position_id,
                    level = %state.current_level,
                    order = %broker_order_id,
                    action,
                    "Exit order submitted"
                );
                state.record(action, format!("submitted {broker_order_id}"));
            }
            Err(e) => {
                warn!(
                    position = %state.position_id,
                    level = %state.current_level,
                    error = %e,
                    action,
                    "Exit action failed to submit, level timer continues"
                );
                state.record(action, format!("outcome unknown: {e}"));
            }
        }
    }

    /// Remaining quantity and direction, broker first, ledger hints second.
    async fn remaining(&self, ctx: &RunContext) -> Option<(Decimal, Direction)> {
        match self.broker.get_open_positions().await {
            Ok(positions) => positions
                .iter()
                .find(|p| p.symbol == ctx.position_id)
                .map(|p| (p.qty.abs(), Direction::from_qty(p.qty))),
            Err(e) => {
                debug!(position = %ctx.position_id, error = %e, "Position query failed, using hints");
                if ctx.qty_hint > Decimal::ZERO {
                    Some((ctx.qty_hint, ctx.direction_hint))
                } else {
                    None
                }
            }
        }
    }

    async fn is_flat(&self, position_id: &str) -> Result<bool, BrokerError> {
        let positions = self.broker.get_open_positions().await?;
        Ok(!positions
            .iter()
            .any(|p| p.symbol == position_id && p.qty != Decimal::ZERO))
    }

    async fn cancel_symbol_orders(&self, symbol: &str) -> usize {
        let orders = match self.broker.get_open_orders(symbol).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(position = %symbol, error = %e, "Open-order query failed, nothing canceled");
                return 0;
            }
        };

        let mut canceled = 0;
        for order in &orders {
            match self.broker.cancel_order(&order.broker_order_id).await {
                Ok(()) => canceled += 1,
                Err(e) => {
                    warn!(
                        position = %symbol,
                        order = %order.broker_order_id,
                        error = %e,
                        "Cancel failed"
                    );
                }
            }
        }
        canceled
    }

    /// Poll until the symbol has no working orders or the confirmation
    /// window lapses.
    async fn await_cancel_confirmations(&self, symbol: &str) {
        let window = self.config.cancel_confirm_timeout();
        let step = std::time::Duration::from_millis(100).min(window);
        let deadline = tokio::time::Instant::now() + window;

        while tokio::time::Instant::now() < deadline {
            match self.broker.get_open_orders(symbol).await {
                Ok(orders) if orders.is_empty() => return,
                Ok(_) | Err(_) => {}
            }
            tokio::time::sleep(step).await;
        }
        debug!(position = %symbol, "Cancel confirmations not observed within window");
    }

    /// Track the outstanding market order; on fill, add its slippage.
    async fn settle_market_attempt(
        &self,
        state: &mut RecoveryState,
        last_market: &mut Option<MarketAttempt>,
    ) {
        let Some(attempt) = last_market.as_ref() else {
            return;
        };

        let status = match self.broker.get_order_status(&attempt.broker_order_id).await {
            Ok(status) => status,
            Err(e) => {
                debug!(order = %attempt.broker_order_id, error = %e, "Fill status unavailable");
                return;
            }
        };

        if !status.status.is_terminal() {
            return;
        }

        if status.status == OrderStatus::Filled {
            let slippage = attempt
                .pre_mid
                .map_or(Decimal::ZERO, |mid| (status.avg_fill_price - mid).abs());
            state.slippage_cost += slippage;
            info!(
                position = %state.position_id,
                order = %status.broker_order_id,
                fill_price = %status.avg_fill_price,
                slippage = %slippage,
                "Market exit filled"
            );
            state.record(
                "market_fill",
                format!("filled @ {} slippage {}", status.avg_fill_price, slippage),
            );
        } else {
            state.record(
                "market_fill",
                format!("terminal without fill: {:?}", status.status),
            );
        }
        *last_market = None;
    }

    // ========================================================================
    // Terminal paths
    // ========================================================================

    async fn fire_safety(&self, state: &mut RecoveryState) {
        error!(
            position = %state.position_id,
            elapsed_secs = state.elapsed().as_secs(),
            "Level 5 clock reached: entering close-only mode and raising kill flag"
        );
        self.safety.enter_close_only_mode();
        self.safety.raise_kill_flag();
        state.record("safety_switch", "close-only mode + kill flag");
        self.alerts
            .notify_all(
                Severity::Critical,
                &format!("System shutdown initiated: {}", state.position_id),
                "Recovery exhausted its window; trading is now close-only with the kill flag raised.",
            )
            .await;
    }

    async fn finish_resolved(&self, state: &mut RecoveryState) {
        state.outcome = RecoveryOutcome::Resolved;
        let ended_at = Utc::now();
        let incident = RecoveryIncident::from_state(state, ended_at);

        if let Err(e) = self.incidents.record(&incident) {
            error!(position = %state.position_id, error = %e, "Failed to archive incident");
        }
        if let Err(e) = self.incidents.remove_checkpoint(&state.position_id) {
            error!(position = %state.position_id, error = %e, "Failed to drop checkpoint");
        }

        self.ledger.clear(&state.position_id);
        self.registry.finish(&state.position_id);

        info!(
            position = %state.position_id,
            final_level = %state.current_level,
            duration_secs = incident.duration_secs,
            slippage = %state.slippage_cost,
            "Recovery resolved, position flat"
        );
        self.alerts
            .notify_all(
                Severity::Info,
                &format!("Recovery resolved: {}", state.position_id),
                &format!(
                    "final_level={} duration={}s slippage={}",
                    state.current_level, incident.duration_secs, state.slippage_cost
                ),
            )
            .await;
    }

    /// Shutdown path: keep the checkpoint so the next process resumes the
    /// run at the level its elapsed time implies.
    fn finish_suspended(&self, state: &RecoveryState) {
        self.persist_checkpoint(state);
        self.registry.finish(&state.position_id);
        info!(
            position = %state.position_id,
            level = %state.current_level,
            "Recovery suspended for shutdown, checkpoint persisted"
        );
    }

    fn persist_checkpoint(&self, state: &RecoveryState) {
        let checkpoint = RecoveryCheckpoint {
            position_id: state.position_id.clone(),
            classification: state.classification,
            started_at: state.started_at,
            last_known_level: state.current_level,
        };
        if let Err(e) = self.incidents.checkpoint(checkpoint) {
            error!(position = %state.position_id, error = %e, "Failed to persist checkpoint");
        }
    }

    fn elapsed_since(started_at: DateTime<Utc>) -> std::time::Duration {
        Utc::now()
            .signed_duration_since(started_at)
            .to_std()
            .unwrap_or_default()
    }
}
