//! Consolidation orchestrator: sequences the three stages and aggregates results

use crate::cache::{CacheStats, OntologyCache};
use crate::config::{EngineConfig, StageParams};
use crate::consolidator::{CancelFlag, EntityConsolidator, StageStats};
use crate::error::{Result, StrataError};
use crate::storage_backend::{TierFilter, TierRegistry};
use crate::types::Tier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// One promotion step
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SensoryToShortTerm,
    ShortTermToLongTerm,
    LongTermToArchival,
}

impl Stage {
    /// Stages in execution order
    pub const ALL: &[Stage] = &[
        Stage::SensoryToShortTerm,
        Stage::ShortTermToLongTerm,
        Stage::LongTermToArchival,
    ];

    pub fn source(&self) -> Tier {
        match self {
            Stage::SensoryToShortTerm => Tier::Sensory,
            Stage::ShortTermToLongTerm => Tier::ShortTerm,
            Stage::LongTermToArchival => Tier::LongTerm,
        }
    }

    pub fn target(&self) -> Tier {
        match self {
            Stage::SensoryToShortTerm => Tier::ShortTerm,
            Stage::ShortTermToLongTerm => Tier::LongTerm,
            Stage::LongTermToArchival => Tier::Archival,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::SensoryToShortTerm => "sensory_to_short_term",
            Stage::ShortTermToLongTerm => "short_term_to_long_term",
            Stage::LongTermToArchival => "long_term_to_archival",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = StrataError;

    /// Accepts the stage name or the name of its source tier
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sensory_to_short_term" | "sensory" => Ok(Stage::SensoryToShortTerm),
            "short_term_to_long_term" | "short_term" => Ok(Stage::ShortTermToLongTerm),
            "long_term_to_archival" | "long_term" => Ok(Stage::LongTermToArchival),
            other => Err(StrataError::Validation(format!("unknown stage '{other}'"))),
        }
    }
}

/// Caller-supplied overrides on top of a stage's configured parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageOverrides {
    pub min_age_days: Option<f64>,
    pub min_importance: Option<f64>,
    pub batch_limit: Option<usize>,
    pub dry_run: Option<bool>,
}

impl StageOverrides {
    pub fn dry_run() -> Self {
        Self {
            dry_run: Some(true),
            ..Self::default()
        }
    }

    pub fn apply(&self, mut params: StageParams) -> StageParams {
        if let Some(days) = self.min_age_days {
            params.min_age_days = days;
        }
        if let Some(importance) = self.min_importance {
            params.min_importance = importance;
        }
        if let Some(limit) = self.batch_limit {
            params.batch_limit = limit;
        }
        if let Some(dry_run) = self.dry_run {
            params.dry_run = dry_run;
        }
        params
    }
}

/// Result of one stage invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub run_id: Uuid,
    pub stage: Stage,
    pub params: StageParams,
    pub stats: StageStats,
    /// Set when the stage ended with a stage-level failure
    pub error: Option<String>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl StageReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate of a full three-stage run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub total_processed: u64,
    pub total_consolidated: u64,
    /// Per-candidate errors across every stage
    pub total_errors: u64,
    pub failed_stages: Vec<Stage>,
    pub stages: Vec<StageReport>,
}

/// Counts for one tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierStatistics {
    pub tier: Tier,
    pub available: bool,
    pub total: u64,
    /// Not yet promoted to the next tier
    pub pending: u64,
    pub consolidated: u64,
    pub mean_importance: f64,
    pub error: Option<String>,
}

/// Snapshot returned by `statistics`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatistics {
    pub generated_at: DateTime<Utc>,
    pub tiers: Vec<TierStatistics>,
    pub edge_count: u64,
    pub ontology_cache: CacheStats,
    pub running: Vec<Stage>,
}

/// Observable orchestrator state: the stages currently executing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorState {
    pub running: BTreeSet<Stage>,
}

impl OrchestratorState {
    pub fn is_idle(&self) -> bool {
        self.running.is_empty()
    }
}

/// Removes a stage from the running set when dropped
struct RunningGuard<'a> {
    running: &'a Mutex<BTreeSet<Stage>>,
    stage: Stage,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.stage);
    }
}

/// Runs consolidation stages against the registered tier stores
pub struct ConsolidationOrchestrator {
    registry: TierRegistry,
    config: EngineConfig,
    ontology: Arc<OntologyCache>,
    running: Mutex<BTreeSet<Stage>>,
    /// Serializes archival graph metadata refreshes across runs
    graph_lock: Arc<tokio::sync::Mutex<()>>,
}

impl std::fmt::Debug for ConsolidationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsolidationOrchestrator")
            .field("registry", &self.registry)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConsolidationOrchestrator {
    pub fn new(registry: TierRegistry, config: EngineConfig) -> Self {
        let ontology = Arc::new(OntologyCache::new(config.cache.clone()));
        Self::with_cache(registry, config, ontology)
    }

    pub fn with_cache(
        registry: TierRegistry,
        config: EngineConfig,
        ontology: Arc<OntologyCache>,
    ) -> Self {
        Self {
            registry,
            config,
            ontology,
            running: Mutex::new(BTreeSet::new()),
            graph_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &TierRegistry {
        &self.registry
    }

    pub fn ontology_cache(&self) -> &Arc<OntologyCache> {
        &self.ontology
    }

    pub fn state(&self) -> OrchestratorState {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        OrchestratorState {
            running: running.clone(),
        }
    }

    fn enter(&self, stage: Stage) -> RunningGuard<'_> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.insert(stage);
        RunningGuard {
            running: &self.running,
            stage,
        }
    }

    /// Run a single stage with the configured defaults plus `overrides`
    pub async fn consolidate_stage(
        &self,
        stage: Stage,
        overrides: &StageOverrides,
        cancel: &CancelFlag,
    ) -> StageReport {
        let params = overrides.apply(self.config.stage_params(stage.source()));
        let started_at = Utc::now();
        let timer = Instant::now();
        let run_id = Uuid::new_v4();
        let _guard = self.enter(stage);

        info!(%run_id, stage = %stage, dry_run = params.dry_run, "Running stage");

        let outcome = match EntityConsolidator::new(
            stage.source(),
            self.registry.clone(),
            &self.config,
            Arc::clone(&self.ontology),
        ) {
            Ok(consolidator) => {
                consolidator
                    .with_graph_lock(Arc::clone(&self.graph_lock))
                    .consolidate(&params, cancel)
                    .await
            }
            Err(e) => crate::consolidator::StageOutcome {
                stats: StageStats::default(),
                error: Some(e),
                cancelled: false,
            },
        };

        if let Some(e) = &outcome.error {
            error!(%run_id, stage = %stage, error = %e, "Stage failed");
        }

        StageReport {
            run_id,
            stage,
            params,
            stats: outcome.stats,
            error: outcome.error.map(|e| e.to_string()),
            cancelled: outcome.cancelled,
            started_at,
            elapsed_ms: timer.elapsed().as_millis() as u64,
        }
    }

    pub async fn consolidate_sensory_to_short_term(
        &self,
        overrides: &StageOverrides,
        cancel: &CancelFlag,
    ) -> StageReport {
        self.consolidate_stage(Stage::SensoryToShortTerm, overrides, cancel)
            .await
    }

    pub async fn consolidate_short_term_to_long_term(
        &self,
        overrides: &StageOverrides,
        cancel: &CancelFlag,
    ) -> StageReport {
        self.consolidate_stage(Stage::ShortTermToLongTerm, overrides, cancel)
            .await
    }

    pub async fn consolidate_long_term_to_archival(
        &self,
        overrides: &StageOverrides,
        cancel: &CancelFlag,
    ) -> StageReport {
        self.consolidate_stage(Stage::LongTermToArchival, overrides, cancel)
            .await
    }

    /// Run all three stages in order
    ///
    /// A failed stage does not stop the ones after it. Cancellation stops
    /// before the next stage starts.
    pub async fn consolidate_all(
        &self,
        overrides: &StageOverrides,
        cancel: &CancelFlag,
    ) -> ConsolidationSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut stages = Vec::with_capacity(Stage::ALL.len());

        for stage in Stage::ALL {
            if cancel.is_cancelled() {
                info!(%run_id, stage = %stage, "Cancelled before stage");
                break;
            }
            stages.push(self.consolidate_stage(*stage, overrides, cancel).await);
        }

        let summary = ConsolidationSummary {
            run_id,
            started_at,
            elapsed_ms: timer.elapsed().as_millis() as u64,
            total_processed: stages.iter().map(|r| r.stats.processed).sum(),
            total_consolidated: stages.iter().map(|r| r.stats.consolidated).sum(),
            total_errors: stages.iter().map(|r| r.stats.errors).sum(),
            failed_stages: stages
                .iter()
                .filter(|r| !r.is_success())
                .map(|r| r.stage)
                .collect(),
            stages,
        };
        info!(
            %run_id,
            processed = summary.total_processed,
            consolidated = summary.total_consolidated,
            errors = summary.total_errors,
            failed_stages = summary.failed_stages.len(),
            "Consolidation run finished"
        );
        summary
    }

    /// Per-tier counts, edge count, and cache stats
    pub async fn statistics(&self) -> EngineStatistics {
        let mut tiers = Vec::with_capacity(Tier::ALL.len());
        for tier in Tier::ALL {
            tiers.push(self.tier_statistics(*tier).await);
        }

        let edge_count = match self.registry.resolve(Tier::Archival) {
            Ok(store) => store.count_edges().await.unwrap_or_else(|e| {
                error!(error = %e, "Edge count failed");
                0
            }),
            Err(_) => 0,
        };

        EngineStatistics {
            generated_at: Utc::now(),
            tiers,
            edge_count,
            ontology_cache: self.ontology.stats().await,
            running: self.state().running.into_iter().collect(),
        }
    }

    async fn tier_statistics(&self, tier: Tier) -> TierStatistics {
        let mut stats = TierStatistics {
            tier,
            available: false,
            total: 0,
            pending: 0,
            consolidated: 0,
            mean_importance: 0.0,
            error: None,
        };
        let collect = async {
            let store = self.registry.resolve(tier)?;
            let pending = store.count(tier, &TierFilter::new().consolidated(false)).await?;
            let consolidated = store.count(tier, &TierFilter::new().consolidated(true)).await?;
            let mean = store
                .mean_importance(tier, &TierFilter::new())
                .await?
                .unwrap_or(0.0);
            Ok::<_, StrataError>((pending, consolidated, mean))
        };

        match collect.await {
            Ok((pending, consolidated, mean)) => {
                stats.available = true;
                stats.pending = pending;
                stats.consolidated = consolidated;
                stats.total = pending + consolidated;
                stats.mean_importance = mean;
            }
            Err(e) => stats.error = Some(e.to_string()),
        }
        stats
    }
}
