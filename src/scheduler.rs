//! Periodic `consolidate_all` runs with graceful shutdown

use crate::consolidator::CancelFlag;
use crate::error::{Result, StrataError};
use crate::orchestrator::{ConsolidationOrchestrator, ConsolidationSummary, StageOverrides};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub overrides: StageOverrides,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            overrides: StageOverrides::default(),
        }
    }
}

#[derive(Debug, Default)]
struct SchedulerShared {
    runs: AtomicU64,
    last_summary: RwLock<Option<ConsolidationSummary>>,
}

/// Handle to a running scheduler task
#[derive(Debug)]
pub struct SchedulerHandle {
    shared: Arc<SchedulerShared>,
    cancel: CancelFlag,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Completed runs so far
    pub fn runs(&self) -> u64 {
        self.shared.runs.load(Ordering::SeqCst)
    }

    pub async fn last_summary(&self) -> Option<ConsolidationSummary> {
        self.shared.last_summary.read().await.clone()
    }

    /// Stop the loop; an in-flight run stops at its next candidate boundary
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Spawn the consolidation loop on the current runtime
///
/// The first run starts immediately; later runs follow every `interval`.
/// Ticks missed while a run is in progress are skipped.
pub fn start_scheduler(
    orchestrator: Arc<ConsolidationOrchestrator>,
    config: SchedulerConfig,
) -> Result<SchedulerHandle> {
    if config.interval.is_zero() {
        return Err(StrataError::Configuration(
            "schedule interval must be greater than zero".into(),
        ));
    }

    let shared = Arc::new(SchedulerShared::default());
    let cancel = CancelFlag::new();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    info!(interval_ms = config.interval.as_millis() as u64, "Consolidation scheduler started");
    let task = tokio::spawn(run_loop(
        orchestrator,
        config,
        Arc::clone(&shared),
        cancel.clone(),
        shutdown_rx,
    ));

    Ok(SchedulerHandle {
        shared,
        cancel,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

async fn run_loop(
    orchestrator: Arc<ConsolidationOrchestrator>,
    config: SchedulerConfig,
    shared: Arc<SchedulerShared>,
    cancel: CancelFlag,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let summary = orchestrator.consolidate_all(&config.overrides, &cancel).await;
                let run = shared.runs.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(run, consolidated = summary.total_consolidated, "Scheduled run complete");
                *shared.last_summary.write().await = Some(summary);
            }
            _ = &mut shutdown_rx => {
                info!(runs = shared.runs.load(Ordering::SeqCst), "Consolidation scheduler stopped");
                break;
            }
        }
    }
}
