//! # Strata - Tiered memory consolidation for storage activity
//!
//! Activity records move through four retention tiers
//! (sensory, short-term, long-term, archival). Each promotion scores,
//! tags, and links records; archival records also get an ontology and
//! knowledge-graph edges.

pub mod cache;
pub mod concepts;
pub mod config;
pub mod consolidator;
pub mod error;
pub mod graph;
pub mod importance;
pub mod ingest;
pub mod memory_store;
pub mod ontology;
pub mod orchestrator;
pub mod scheduler;
pub mod search;
pub mod storage_backend;
pub mod store;
pub mod types;

pub use cache::{CacheConfig, CacheConfigBuilder, CacheKey, CacheStats, OntologyCache};
pub use concepts::{ConceptExtractor, VOCABULARY_VERSION};
pub use config::{EngineConfig, EngineConfigBuilder, StageParams};
pub use consolidator::{CancelFlag, EntityConsolidator, StageOutcome, StageStats};
pub use error::{Result, StrataError};
pub use graph::KnowledgeGraphBuilder;
pub use importance::{ImportanceScorer, ImportanceWeights};
pub use ingest::{IngestReport, RawActivity, SensoryRecorder};
pub use memory_store::MemoryTierStore;
pub use ontology::OntologyEnhancer;
pub use orchestrator::{
    ConsolidationOrchestrator, ConsolidationSummary, EngineStatistics, OrchestratorState, Stage,
    StageOverrides, StageReport, TierStatistics,
};
pub use scheduler::{start_scheduler, SchedulerConfig, SchedulerHandle};
pub use search::{ConceptFilter, SearchFacade, SearchHit, SearchQuery};
pub use storage_backend::{RecordPatch, SortKey, TierFilter, TierRegistry, TierStore};
pub use store::SqliteTierStore;
pub use types::{
    ActivityRecord, ActivitySummary, ActivityType, ConceptRelationship, EdgeType, EntityId,
    GraphMetadata, GraphNeighbor, KnowledgeGraphEdge, LineageTransition, Ontology, Tier,
    W5hConcepts, W5hDimension,
};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Main engine handle: stores, orchestrator, recorder and search wired together
#[derive(Clone)]
pub struct Strata {
    registry: TierRegistry,
    orchestrator: Arc<ConsolidationOrchestrator>,
    recorder: Arc<SensoryRecorder>,
    search: SearchFacade,
    data_dir: Option<std::path::PathBuf>,
}

impl std::fmt::Debug for Strata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strata")
            .field("data_dir", &self.data_dir)
            .field("registry", &self.registry)
            .finish()
    }
}

impl Strata {
    /// Open (or create) a SQLite-backed engine in `data_dir`
    pub async fn open(data_dir: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let store = SqliteTierStore::open(data_dir.join("strata.db")).await?;
        let mut engine = Self::with_registry(TierRegistry::uniform(store), config)?;
        engine.data_dir = Some(data_dir);
        Ok(engine)
    }

    /// Engine over the in-process store
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        Self::with_registry(TierRegistry::uniform(MemoryTierStore::new()), config)
    }

    /// Engine over caller-supplied tier stores
    pub fn with_registry(registry: TierRegistry, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let sensory = registry.resolve(Tier::Sensory)?;
        let recorder = SensoryRecorder::new(sensory, ImportanceScorer::new(config.importance.clone()));
        let search = SearchFacade::new(registry.clone(), config.graph_neighbor_limit);
        let orchestrator = ConsolidationOrchestrator::new(registry.clone(), config);

        Ok(Self {
            registry,
            orchestrator: Arc::new(orchestrator),
            recorder: Arc::new(recorder),
            search,
            data_dir: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        self.orchestrator.config()
    }

    pub fn registry(&self) -> &TierRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<ConsolidationOrchestrator> {
        &self.orchestrator
    }

    /// Record raw collector events into the Sensory tier
    pub async fn ingest(&self, events: Vec<RawActivity>) -> Result<IngestReport> {
        self.recorder.record(events).await
    }

    pub async fn consolidate(&self, stage: Stage, overrides: &StageOverrides) -> StageReport {
        self.orchestrator
            .consolidate_stage(stage, overrides, &CancelFlag::new())
            .await
    }

    pub async fn consolidate_sensory_to_short_term(&self, overrides: &StageOverrides) -> StageReport {
        self.consolidate(Stage::SensoryToShortTerm, overrides).await
    }

    pub async fn consolidate_short_term_to_long_term(&self, overrides: &StageOverrides) -> StageReport {
        self.consolidate(Stage::ShortTermToLongTerm, overrides).await
    }

    pub async fn consolidate_long_term_to_archival(&self, overrides: &StageOverrides) -> StageReport {
        self.consolidate(Stage::LongTermToArchival, overrides).await
    }

    pub async fn consolidate_all(&self, overrides: &StageOverrides) -> ConsolidationSummary {
        self.orchestrator
            .consolidate_all(overrides, &CancelFlag::new())
            .await
    }

    pub async fn statistics(&self) -> EngineStatistics {
        self.orchestrator.statistics().await
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        self.search.search(query).await
    }

    /// Start periodic `consolidate_all` runs at the configured interval
    pub fn schedule(&self) -> Result<SchedulerHandle> {
        start_scheduler(
            Arc::clone(&self.orchestrator),
            SchedulerConfig {
                interval: Duration::from_secs(self.config().schedule_interval_secs),
                overrides: StageOverrides::default(),
            },
        )
    }
}
