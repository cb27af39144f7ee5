//! Recovery Engine Binary
//!
//! Starts the stuck-position recovery services: the reconciler, the
//! stuck-position monitor, and the emergency exit executor, then resumes
//! any recoveries persisted by a previous process.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin recovery-engine
//! ```
//!
//! # Environment Variables
//!
//! - `RECOVERY_CONFIG`: Path to the YAML config file (default: config.yaml)
//! - `RUST_LOG`: Log filter override (default: from config `logging.level`)
//!
//! The binary wires the paper gateway; a live broker integration plugs in
//! behind the `BrokerGateway` trait.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use recovery_engine::alerts::AlertSink;
use recovery_engine::broker::MockBrokerGateway;
use recovery_engine::config::{Config, load_config};
use recovery_engine::incidents::IncidentStore;
use recovery_engine::ledger::PositionLedger;
use recovery_engine::monitor::StuckPositionMonitor;
use recovery_engine::reconciler::PositionReconciler;
use recovery_engine::recovery::{EmergencyExitExecutor, RecoveryRegistry};
use recovery_engine::safety::{SafetySwitch, TradingSafetySwitch};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Grace period for in-flight escalation runs to persist checkpoints.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let config_path = std::env::var("RECOVERY_CONFIG").ok();
    let config = load_config(config_path.as_deref()).context("loading configuration")?;

    init_tracing(&config);
    tracing::info!("Starting recovery engine");
    log_config(&config);

    let broker = Arc::new(MockBrokerGateway::new());
    let ledger = Arc::new(PositionLedger::new());
    let registry = Arc::new(RecoveryRegistry::new());
    let incidents =
        Arc::new(IncidentStore::open(&config.incidents.dir).context("opening incident store")?);
    let alerts = Arc::new(AlertSink::from_config(&config.alerts));
    let safety = Arc::new(TradingSafetySwitch::new());
    let shutdown = CancellationToken::new();

    let executor = Arc::new(EmergencyExitExecutor::new(
        config.escalation.clone(),
        Arc::clone(&broker),
        Arc::clone(&ledger),
        Arc::clone(&registry),
        Arc::clone(&incidents),
        Arc::clone(&alerts),
        Arc::clone(&safety) as Arc<dyn SafetySwitch>,
        shutdown.clone(),
    ));

    match incidents.recent_incidents(5) {
        Ok(recent) if !recent.is_empty() => {
            tracing::info!(count = recent.len(), "Recent incidents on record");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Could not read incident archive"),
    }

    resume_persisted_recoveries(&executor, &incidents);

    let reconciler = Arc::new(PositionReconciler::new(
        config.reconciler.clone(),
        Arc::clone(&broker),
        Arc::clone(&ledger),
        Arc::clone(&executor),
    ));
    let monitor = Arc::new(StuckPositionMonitor::new(
        config.monitor.clone(),
        Arc::clone(&ledger),
        Arc::clone(&executor),
    ));

    let reconciler_handle = {
        let token = shutdown.clone();
        tokio::spawn(async move { reconciler.run(token).await })
    };
    let monitor_handle = {
        let token = shutdown.clone();
        tokio::spawn(async move { monitor.run(token).await })
    };

    tracing::info!("Recovery engine ready");

    wait_for_shutdown_signal().await;
    shutdown.cancel();

    let _ = reconciler_handle.await;
    let _ = monitor_handle.await;

    // In-flight escalation runs observe the token at their next poll and
    // persist a checkpoint before exiting.
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    tracing::info!("Recovery engine stopped");
    Ok(())
}

/// Load .env from the current or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Initialize the tracing subscriber; `RUST_LOG` overrides the config level.
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "recovery_engine={}",
            config.logging.level
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Log the parsed configuration.
fn log_config(config: &Config) {
    tracing::info!(
        reconcile_interval_secs = config.reconciler.interval_secs,
        monitor_interval_secs = config.monitor.interval_secs,
        level5_after_secs = config.escalation.level5_after_secs,
        incident_dir = %config.incidents.dir,
        alert_webhooks = config.alerts.webhooks.len(),
        "Configuration loaded"
    );
}

/// Resume recoveries persisted by a previous process.
fn resume_persisted_recoveries(
    executor: &Arc<EmergencyExitExecutor<MockBrokerGateway>>,
    incidents: &Arc<IncidentStore>,
) {
    let checkpoints = incidents.checkpoints();
    if checkpoints.is_empty() {
        return;
    }

    tracing::warn!(
        count = checkpoints.len(),
        "Unresolved recoveries found from previous process"
    );
    let mut resumed = 0;
    for checkpoint in &checkpoints {
        if executor.resume(checkpoint) {
            resumed += 1;
        }
    }
    tracing::info!(resumed, "Persisted recoveries resumed");
}

/// Wait for SIGINT or SIGTERM.
///
/// # Panics
///
/// Panics if signal handlers cannot be installed: a process that cannot
/// respond to termination signals should fail fast at startup.
#[allow(clippy::expect_used)]
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
