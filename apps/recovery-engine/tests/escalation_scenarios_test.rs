//! End-to-end escalation scenarios against the mock gateway.
//!
//! Level timeouts are configured at second scale so each scenario runs in a
//! few seconds of wall clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

use recovery_engine::alerts::{AlertSink, Notifier, NotifyError, Severity};
use recovery_engine::broker::{FillMode, MockBrokerGateway};
use recovery_engine::config::{EscalationConfig, MonitorConfig, ReconcilerConfig};
use recovery_engine::incidents::IncidentStore;
use recovery_engine::ledger::PositionLedger;
use recovery_engine::models::{Direction, Position, StuckClassification};
use recovery_engine::monitor::StuckPositionMonitor;
use recovery_engine::reconciler::PositionReconciler;
use recovery_engine::recovery::{
    EmergencyExitExecutor, EscalationLevel, RecoveryOutcome, RecoveryRegistry,
};
use recovery_engine::safety::SafetySwitch;

/// Notifier that counts deliveries per channel.
struct CountingNotifier {
    delivered: AtomicUsize,
}

impl CountingNotifier {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            delivered: AtomicUsize::new(0),
        })
    }

    fn count(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify(
        &self,
        _severity: Severity,
        _title: &str,
        _body: &str,
    ) -> Result<(), NotifyError> {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn channel_name(&self) -> &'static str {
        "counting"
    }
}

/// Safety switch that counts invocations of each control.
#[derive(Default)]
struct CountingSafetySwitch {
    close_only_calls: AtomicUsize,
    kill_calls: AtomicUsize,
}

impl SafetySwitch for CountingSafetySwitch {
    fn enter_close_only_mode(&self) {
        self.close_only_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn raise_kill_flag(&self) {
        self.kill_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn is_close_only(&self) -> bool {
        self.close_only_calls.load(Ordering::SeqCst) > 0
    }

    fn is_kill_flag_raised(&self) -> bool {
        self.kill_calls.load(Ordering::SeqCst) > 0
    }
}

struct Harness {
    broker: Arc<MockBrokerGateway>,
    ledger: Arc<PositionLedger>,
    registry: Arc<RecoveryRegistry>,
    incidents: Arc<IncidentStore>,
    executor: Arc<EmergencyExitExecutor<MockBrokerGateway>>,
    safety: Arc<CountingSafetySwitch>,
    channels: Vec<Arc<CountingNotifier>>,
    shutdown: CancellationToken,
    _tmp: tempfile::TempDir,
}

fn fast_config() -> EscalationConfig {
    EscalationConfig {
        level1_timeout_secs: 1,
        level2_timeout_secs: 1,
        level3_timeout_secs: 1,
        level4_timeout_secs: 1,
        level5_after_secs: 4,
        fill_poll_interval_ms: 50,
        market_retry_interval_secs: 1,
        cancel_confirm_timeout_ms: 100,
        ..EscalationConfig::default()
    }
}

fn make_harness(config: EscalationConfig, channel_count: usize) -> Harness {
    let tmp = tempfile::tempdir().expect("tempdir");
    let broker = Arc::new(MockBrokerGateway::new());
    let ledger = Arc::new(PositionLedger::new());
    let registry = Arc::new(RecoveryRegistry::new());
    let incidents = Arc::new(IncidentStore::open(tmp.path()).expect("store"));
    let safety = Arc::new(CountingSafetySwitch::default());
    let shutdown = CancellationToken::new();

    let channels: Vec<Arc<CountingNotifier>> =
        (0..channel_count).map(|_| CountingNotifier::new()).collect();
    let sink_channels: Vec<Arc<dyn Notifier>> = channels
        .iter()
        .map(|c| Arc::clone(c) as Arc<dyn Notifier>)
        .collect();

    let executor = Arc::new(EmergencyExitExecutor::new(
        config,
        Arc::clone(&broker),
        Arc::clone(&ledger),
        Arc::clone(&registry),
        Arc::clone(&incidents),
        Arc::new(AlertSink::with_channels(sink_channels)),
        Arc::clone(&safety) as Arc<dyn SafetySwitch>,
        shutdown.clone(),
    ));

    Harness {
        broker,
        ledger,
        registry,
        incidents,
        executor,
        safety,
        channels,
        shutdown,
        _tmp: tmp,
    }
}

fn aged_position(symbol: &str, qty: Decimal, age_secs: i64) -> Position {
    Position {
        symbol: symbol.to_string(),
        qty,
        direction: Direction::from_qty(qty),
        entry_price: dec!(5000),
        unrealized_pnl: Decimal::ZERO,
        opened_at: Utc::now() - chrono::Duration::seconds(age_secs),
        strategy: None,
        last_exit: None,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    condition()
}

// ============================================================================
// Scenario A: ghost position detected by the reconciler
// ============================================================================

#[tokio::test]
async fn ghost_position_enters_recovery_at_level_one() {
    let harness = make_harness(fast_config(), 0);
    harness.broker.set_fill_mode(FillMode::FillNone);
    harness.broker.set_position("ESZ6", dec!(2), dec!(5000));
    harness.broker.set_quote("ESZ6", dec!(4999.75), dec!(5000.25));

    let reconciler = PositionReconciler::new(
        ReconcilerConfig::default(),
        Arc::clone(&harness.broker),
        Arc::clone(&harness.ledger),
        Arc::clone(&harness.executor),
    );

    let summary = reconciler.reconcile_once().await.expect("reconcile");
    assert_eq!(summary.ghost, 1);
    assert!(harness.registry.is_active("ESZ6"));

    // The run starts at level 1 and persists its checkpoint there.
    let incidents = Arc::clone(&harness.incidents);
    assert!(
        wait_until(
            || {
                incidents
                    .checkpoints()
                    .iter()
                    .any(|c| c.position_id == "ESZ6"
                        && c.classification == StuckClassification::Ghost
                        && c.last_known_level == EscalationLevel::SmartRetry)
            },
            Duration::from_secs(1),
        )
        .await,
        "ghost recovery should checkpoint at level 1"
    );

    harness.shutdown.cancel();
}

// ============================================================================
// Scenario B: aged-out classification
// ============================================================================

#[tokio::test]
async fn position_past_max_age_is_flagged_aged_out() {
    let harness = make_harness(fast_config(), 0);
    harness.broker.set_fill_mode(FillMode::FillNone);
    harness.broker.set_quote("ESZ6", dec!(4999.75), dec!(5000.25));
    harness.broker.set_position("ESZ6", dec!(1), dec!(5000));

    // Opened 4h01m ago against a 4h maximum.
    harness
        .ledger
        .insert(aged_position("ESZ6", dec!(1), 4 * 3600 + 60));

    let monitor = StuckPositionMonitor::new(
        MonitorConfig::default(),
        Arc::clone(&harness.ledger),
        Arc::clone(&harness.executor),
    );

    assert_eq!(monitor.scan_once(), 1);
    assert!(harness.registry.is_active("ESZ6"));

    let incidents = Arc::clone(&harness.incidents);
    assert!(
        wait_until(
            || {
                incidents
                    .checkpoints()
                    .iter()
                    .any(|c| c.classification == StuckClassification::AgedOut)
            },
            Duration::from_secs(1),
        )
        .await
    );

    harness.shutdown.cancel();
}

// ============================================================================
// Scenario C: levels 1-2 fail, level 3 market order resolves with slippage
// ============================================================================

#[tokio::test]
async fn market_order_resolves_after_limit_levels_fail() {
    let harness = make_harness(fast_config(), 0);
    // Limit exits rest unfilled; only the level-3 market order fills.
    harness.broker.set_fill_mode(FillMode::FillMarketOnly);
    harness.broker.set_position("ESZ6", dec!(2), dec!(5000));
    // Mid is 5000.00; a market sell fills on the bid at 4999.75.
    harness.broker.set_quote("ESZ6", dec!(4999.75), dec!(5000.25));
    harness.ledger.insert(aged_position("ESZ6", dec!(2), 4 * 3600 + 60));

    let monitor = StuckPositionMonitor::new(
        MonitorConfig::default(),
        Arc::clone(&harness.ledger),
        Arc::clone(&harness.executor),
    );
    assert_eq!(monitor.scan_once(), 1);

    let registry = Arc::clone(&harness.registry);
    assert!(
        wait_until(|| !registry.is_active("ESZ6"), Duration::from_secs(5)).await,
        "run should resolve at level 3"
    );

    let incidents = harness.incidents.recent_incidents(10).expect("read archive");
    assert_eq!(incidents.len(), 1);
    let incident = &incidents[0];
    assert_eq!(incident.outcome, RecoveryOutcome::Resolved);
    assert_eq!(incident.final_level, EscalationLevel::MarketOrder);
    // Slippage = |fill - pre-submission mid| = |4999.75 - 5000.00|.
    assert_eq!(incident.slippage_cost, dec!(0.25));

    // Levels 1 and 2 each submitted a (never-filled) limit exit first.
    assert!(harness.broker.submitted_orders().len() >= 3);
    assert!(harness.broker.market_order_count() >= 1);
    assert!(harness.ledger.get("ESZ6").is_none());
    assert!(harness.incidents.checkpoints().is_empty());
}

// ============================================================================
// Scenario D: level 3 fails to fill, level 4 notifies every channel
// ============================================================================

#[tokio::test]
async fn unfilled_market_order_escalates_to_human_notification() {
    let config = EscalationConfig {
        // Keep the level-5 clock far away so the test observes level 4.
        level5_after_secs: 600,
        ..fast_config()
    };
    let harness = make_harness(config, 2);
    harness.broker.set_fill_mode(FillMode::FillNone);
    harness.broker.set_position("ESZ6", dec!(2), dec!(5000));
    harness.broker.set_quote("ESZ6", dec!(4999.75), dec!(5000.25));
    harness.ledger.insert(aged_position("ESZ6", dec!(2), 4 * 3600 + 60));

    let monitor = StuckPositionMonitor::new(
        MonitorConfig::default(),
        Arc::clone(&harness.ledger),
        Arc::clone(&harness.executor),
    );
    assert_eq!(monitor.scan_once(), 1);

    let incidents = Arc::clone(&harness.incidents);
    assert!(
        wait_until(
            || {
                incidents
                    .checkpoints()
                    .iter()
                    .any(|c| c.last_known_level == EscalationLevel::HumanEscalation)
            },
            Duration::from_secs(6),
        )
        .await,
        "run should reach level 4"
    );

    // Every configured channel was notified at least once (run start plus
    // the level-4 escalation).
    for channel in &harness.channels {
        assert!(channel.count() >= 2, "channel saw {} deliveries", channel.count());
    }

    // Market orders keep being resubmitted on the retry cadence.
    let broker = Arc::clone(&harness.broker);
    let initial = broker.market_order_count();
    assert!(
        wait_until(
            || broker.market_order_count() > initial,
            Duration::from_secs(3),
        )
        .await,
        "market order should be resubmitted at level 4"
    );

    harness.shutdown.cancel();
}

// ============================================================================
// Scenario E: the level-5 clock fires the safety switch exactly once
// ============================================================================

#[tokio::test]
async fn level_five_clock_fires_safety_switch_exactly_once() {
    let harness = make_harness(fast_config(), 1);
    harness.broker.set_fill_mode(FillMode::FillNone);
    harness.broker.set_position("ESZ6", dec!(2), dec!(5000));
    harness.broker.set_quote("ESZ6", dec!(4999.75), dec!(5000.25));
    harness.ledger.insert(aged_position("ESZ6", dec!(2), 4 * 3600 + 60));

    let monitor = StuckPositionMonitor::new(
        MonitorConfig::default(),
        Arc::clone(&harness.ledger),
        Arc::clone(&harness.executor),
    );
    assert_eq!(monitor.scan_once(), 1);

    // level5_after_secs = 4 in the fast config.
    let safety = Arc::clone(&harness.safety);
    assert!(
        wait_until(
            || safety.is_close_only() && safety.is_kill_flag_raised(),
            Duration::from_secs(7),
        )
        .await,
        "safety switch should fire at the level-5 clock"
    );

    // Give the run time to show the invocation is not repeated.
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(harness.safety.close_only_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.safety.kill_calls.load(Ordering::SeqCst), 1);

    let checkpoints = harness.incidents.checkpoints();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(
        checkpoints[0].last_known_level,
        EscalationLevel::SystemShutdown
    );

    harness.shutdown.cancel();
}

// ============================================================================
// Property: concurrent runs stay independent, one per position
// ============================================================================

#[tokio::test]
async fn concurrent_recoveries_run_independently() {
    let harness = make_harness(fast_config(), 0);
    harness.broker.set_fill_mode(FillMode::FillMarketOnly);
    for symbol in ["ESZ6", "NQZ6", "CLZ6"] {
        harness.broker.set_position(symbol, dec!(1), dec!(100));
        harness.broker.set_quote(symbol, dec!(99.75), dec!(100.25));
        harness
            .ledger
            .insert(aged_position(symbol, dec!(1), 4 * 3600 + 60));
    }

    let monitor = StuckPositionMonitor::new(
        MonitorConfig::default(),
        Arc::clone(&harness.ledger),
        Arc::clone(&harness.executor),
    );
    assert_eq!(monitor.scan_once(), 3);
    assert_eq!(harness.registry.count(), 3);

    let registry = Arc::clone(&harness.registry);
    assert!(
        wait_until(|| registry.count() == 0, Duration::from_secs(6)).await,
        "all three runs should resolve"
    );

    let incidents = harness.incidents.recent_incidents(10).expect("read archive");
    assert_eq!(incidents.len(), 3);
    assert!(incidents.iter().all(|i| i.outcome == RecoveryOutcome::Resolved));
}
