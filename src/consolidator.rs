//! Entity consolidation: promotes eligible records from one tier to the next
//!
//! A stage queries its source tier for aged, important, unflagged records and
//! writes a target-tier document for each. The source flag is only set once
//! the target write has succeeded, so an interrupted run leaves candidates
//! eligible and a rerun picks them up through the "already present" path.

use crate::cache::OntologyCache;
use crate::concepts::ConceptExtractor;
use crate::config::{EngineConfig, StageParams};
use crate::error::{Result, StrataError};
use crate::graph::KnowledgeGraphBuilder;
use crate::importance::ImportanceScorer;
use crate::storage_backend::{RecordPatch, SortKey, TierFilter, TierRegistry, TierStore};
use crate::types::{ActivityRecord, EntityId, LineageTransition, Tier};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Counters reported by one stage invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    pub processed: u64,
    pub consolidated: u64,
    pub already_present: u64,
    pub below_threshold: u64,
    pub errors: u64,
    /// Archival stage only
    pub edges_created: u64,
}

impl StageStats {
    pub fn merge(&mut self, other: &StageStats) {
        self.processed += other.processed;
        self.consolidated += other.consolidated;
        self.already_present += other.already_present;
        self.below_threshold += other.below_threshold;
        self.errors += other.errors;
        self.edges_created += other.edges_created;
    }
}

/// Cooperative cancellation, checked between candidates
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Stats of a stage run plus the error that ended it, if any
#[derive(Debug)]
pub struct StageOutcome {
    pub stats: StageStats,
    pub error: Option<StrataError>,
    pub cancelled: bool,
}

impl StageOutcome {
    fn failed(stats: StageStats, error: StrataError) -> Self {
        Self {
            stats,
            error: Some(error),
            cancelled: false,
        }
    }
}

enum Candidate {
    Consolidated {
        edges: u64,
        graph_failed: bool,
        /// Archival entities whose graph metadata needs a refresh
        touched: Vec<EntityId>,
    },
    AlreadyPresent,
    BelowThreshold,
    Failed(StrataError),
    Skipped,
}

/// Edges written for one new archival document
#[derive(Default)]
struct Linked {
    created: u64,
    touched: Vec<EntityId>,
    error: Option<StrataError>,
}

/// Promotes records from `source` into the next tier
pub struct EntityConsolidator {
    source: Tier,
    target: Tier,
    registry: TierRegistry,
    scorer: ImportanceScorer,
    extractor: ConceptExtractor,
    ontology: Arc<OntologyCache>,
    graph: KnowledgeGraphBuilder,
    concurrency: usize,
    sibling_scan_limit: usize,
    edge_limit: usize,
    graph_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for EntityConsolidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityConsolidator")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl EntityConsolidator {
    pub fn new(
        source: Tier,
        registry: TierRegistry,
        config: &EngineConfig,
        ontology: Arc<OntologyCache>,
    ) -> Result<Self> {
        let target = source.next().ok_or_else(|| {
            StrataError::Validation(format!("tier {source} has no tier to promote into"))
        })?;
        Ok(Self {
            source,
            target,
            registry,
            scorer: ImportanceScorer::new(config.importance.clone()),
            extractor: ConceptExtractor::new(),
            ontology,
            graph: KnowledgeGraphBuilder::new(),
            concurrency: config.concurrency.max(1),
            sibling_scan_limit: config.sibling_scan_limit,
            edge_limit: config.edge_limit,
            graph_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Share the graph metadata lock with other consolidators on the same
    /// archive, so concurrent runs never write stale relationship counts
    pub fn with_graph_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.graph_lock = lock;
        self
    }

    pub fn source(&self) -> Tier {
        self.source
    }

    pub fn target(&self) -> Tier {
        self.target
    }

    /// Run one batch
    ///
    /// Never returns early without stats: stage-level failures come back in
    /// `StageOutcome::error` alongside whatever was done before them.
    pub async fn consolidate(&self, params: &StageParams, cancel: &CancelFlag) -> StageOutcome {
        let mut stats = StageStats::default();
        let stage = format!("{}->{}", self.source, self.target);

        if let Err(e) = params.validate() {
            return StageOutcome::failed(stats, e);
        }
        let (source_store, target_store) =
            match (self.registry.resolve(self.source), self.registry.resolve(self.target)) {
                (Ok(s), Ok(t)) => (s, t),
                (Err(e), _) | (_, Err(e)) => {
                    error!(stage = %stage, error = %e, "Stage dependencies unavailable");
                    return StageOutcome::failed(stats, e);
                }
            };

        let now = Utc::now();
        let cutoff = match params.cutoff(now) {
            Ok(cutoff) => cutoff,
            Err(e) => return StageOutcome::failed(stats, e),
        };
        let aged_unflagged = TierFilter::new().first_seen_before(cutoff).consolidated(false);

        let candidates = match source_store
            .query(
                self.source,
                &aged_unflagged.clone().min_importance(params.min_importance),
                SortKey::ImportanceDesc,
                Some(params.batch_limit),
            )
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(stage = %stage, error = %e, "Eligibility query failed");
                return StageOutcome::failed(stats, e);
            }
        };

        match source_store
            .count(
                self.source,
                &aged_unflagged.importance_below(params.min_importance),
            )
            .await
        {
            Ok(count) => stats.below_threshold = count,
            Err(e) => {
                error!(stage = %stage, error = %e, "Below-threshold count failed");
                return StageOutcome::failed(stats, e);
            }
        }

        info!(
            stage = %stage,
            candidates = candidates.len(),
            dry_run = params.dry_run,
            "Starting consolidation batch"
        );

        let source_store = &source_store;
        let target_store = &target_store;
        let mut results = stream::iter(candidates)
            .map(|record| {
                self.process(record, source_store, target_store, params, cutoff, now, cancel)
            })
            .buffer_unordered(self.concurrency);

        let mut fatal = None;
        let mut cancelled = false;
        let mut touched = BTreeSet::new();
        while let Some(result) = results.next().await {
            match result {
                Candidate::Skipped => {
                    cancelled = true;
                    continue;
                }
                Candidate::Consolidated {
                    edges,
                    graph_failed,
                    touched: linked,
                } => {
                    stats.consolidated += 1;
                    stats.edges_created += edges;
                    if graph_failed {
                        stats.errors += 1;
                    }
                    touched.extend(linked);
                }
                Candidate::AlreadyPresent => stats.already_present += 1,
                Candidate::BelowThreshold => stats.below_threshold += 1,
                Candidate::Failed(e) => {
                    stats.errors += 1;
                    if e.is_stage_fatal() {
                        fatal = Some(e);
                    }
                }
            }
            stats.processed += 1;
            if fatal.is_some() {
                break;
            }
        }
        drop(results);

        // Edges from every worker are in place now, so counts are complete
        if let Some(e) = self.refresh_graph(target_store, &touched, &mut stats).await {
            fatal.get_or_insert(e);
        }

        if let Some(e) = fatal {
            error!(stage = %stage, error = %e, ?stats, "Stage aborted");
            return StageOutcome::failed(stats, e);
        }

        info!(
            stage = %stage,
            processed = stats.processed,
            consolidated = stats.consolidated,
            already_present = stats.already_present,
            below_threshold = stats.below_threshold,
            errors = stats.errors,
            edges_created = stats.edges_created,
            cancelled,
            "Consolidation batch finished"
        );
        StageOutcome {
            stats,
            error: None,
            cancelled,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn process(
        &self,
        record: ActivityRecord,
        source_store: &Arc<dyn TierStore>,
        target_store: &Arc<dyn TierStore>,
        params: &StageParams,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
        cancel: &CancelFlag,
    ) -> Candidate {
        if cancel.is_cancelled() {
            return Candidate::Skipped;
        }
        let id = record.entity_id.clone();

        if let Err(e) = self.check_source(&record) {
            warn!(entity_id = %id, tier = %self.source, error = %e, "Invalid candidate");
            return Candidate::Failed(e);
        }

        match target_store.exists(self.target, &id).await {
            Ok(true) => {
                debug!(entity_id = %id, tier = %self.target, "Target already present");
                return self.flag_present(source_store, &id, params).await;
            }
            Ok(false) => {}
            Err(e) => return self.failed(&id, e),
        }

        if record.importance_score < params.min_importance || record.first_seen > cutoff {
            debug!(entity_id = %id, importance = record.importance_score, "Below threshold");
            return Candidate::BelowThreshold;
        }
        if params.dry_run {
            return Candidate::Consolidated {
                edges: 0,
                graph_failed: false,
                touched: Vec::new(),
            };
        }

        let document = match self.build_target(&record, now).await {
            Ok(document) => document,
            Err(e) => return self.failed(&id, e),
        };

        match target_store.insert(&document).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                debug!(entity_id = %id, tier = %self.target, "Lost insert race");
                return self.flag_present(source_store, &id, params).await;
            }
            Err(e) => return self.failed(&id, e),
        }

        let linked = if self.target == Tier::Archival {
            self.link(&document, target_store).await
        } else {
            Linked::default()
        };
        if let Some(e) = &linked.error {
            warn!(entity_id = %id, error = %e, "Knowledge graph update failed");
        }

        if let Err(e) = source_store
            .update(self.source, &id, &RecordPatch::mark_consolidated())
            .await
        {
            return self.failed(&id, e);
        }

        debug!(
            entity_id = %id,
            from = %self.source,
            to = %self.target,
            importance = document.importance_score,
            "Consolidated"
        );
        Candidate::Consolidated {
            edges: linked.created,
            graph_failed: linked.error.is_some(),
            touched: linked.touched,
        }
    }

    fn failed(&self, entity_id: &str, e: StrataError) -> Candidate {
        warn!(entity_id = %entity_id, tier = %self.source, error = %e, "Candidate failed");
        Candidate::Failed(e)
    }

    async fn flag_present(
        &self,
        source_store: &Arc<dyn TierStore>,
        entity_id: &str,
        params: &StageParams,
    ) -> Candidate {
        if params.dry_run {
            return Candidate::AlreadyPresent;
        }
        match source_store
            .update(self.source, entity_id, &RecordPatch::mark_consolidated())
            .await
        {
            Ok(()) => Candidate::AlreadyPresent,
            Err(e) => self.failed(entity_id, e),
        }
    }

    fn check_source(&self, record: &ActivityRecord) -> Result<()> {
        if record.tier != self.source {
            return Err(StrataError::Validation(format!(
                "record {} is in tier {} but was read from {}",
                record.entity_id, record.tier, self.source
            )));
        }
        record.validate()
    }

    /// Build the next-tier document for a validated source record
    async fn build_target(&self, record: &ActivityRecord, now: DateTime<Utc>) -> Result<ActivityRecord> {
        let mut document = record.clone();
        document.tier = self.target;
        document.consolidated_to_next = false;
        document.graph = None;

        if self.source == Tier::Sensory {
            // First promotion scores and tags the raw record
            document.importance_score = self.scorer.score(record);
            document.w5h_concepts.merge(&self.extractor.extract(record, now));
        }
        document.refresh_semantic_concepts();

        let transition_date = record
            .memory_lineage
            .last()
            .map_or(now, |last| last.transition_date.max(now));
        document.memory_lineage.push(LineageTransition::new(
            self.source,
            self.target,
            transition_date,
            record.importance_score,
        )?);

        if self.target == Tier::Archival {
            document.ontology = Some(self.ontology.enhance(&document.w5h_concepts).await);
        }

        document.validate()?;
        Ok(document)
    }

    /// Write edges between a new archival document and its siblings
    ///
    /// Metadata is left to `refresh_graph`, which runs once the batch drains.
    async fn link(&self, document: &ActivityRecord, archive: &Arc<dyn TierStore>) -> Linked {
        let mut linked = Linked {
            touched: vec![document.entity_id.clone()],
            ..Linked::default()
        };
        let siblings = match archive
            .query(
                Tier::Archival,
                &TierFilter::new(),
                SortKey::ImportanceDesc,
                Some(self.sibling_scan_limit),
            )
            .await
        {
            Ok(siblings) => siblings,
            Err(e) => {
                linked.error = Some(e);
                return linked;
            }
        };

        let edges = self.graph.build_edges(document, &siblings, self.edge_limit);
        linked.touched.extend(self.graph.neighbors(&document.entity_id, &edges));
        for edge in &edges {
            match archive.insert_edge(edge).await {
                Ok(true) => linked.created += 1,
                Ok(false) => {}
                Err(e) => {
                    linked.error = Some(e);
                    break;
                }
            }
        }
        linked
    }

    /// Recompute graph metadata from the stored edges of every touched entity
    ///
    /// Returns a stage-fatal error if one stops the refresh; other failures
    /// are counted.
    async fn refresh_graph(
        &self,
        archive: &Arc<dyn TierStore>,
        touched: &BTreeSet<EntityId>,
        stats: &mut StageStats,
    ) -> Option<StrataError> {
        if touched.is_empty() {
            return None;
        }
        let _guard = self.graph_lock.lock().await;
        for entity_id in touched {
            let refreshed = async {
                let edges = archive.edges_for(entity_id, None).await?;
                let metadata = self.graph.metadata(&edges);
                archive
                    .update(Tier::Archival, entity_id, &RecordPatch::graph(metadata))
                    .await
            }
            .await;
            if let Err(e) = refreshed {
                warn!(entity_id = %entity_id, tier = %Tier::Archival, error = %e, "Graph metadata refresh failed");
                stats.errors += 1;
                if e.is_stage_fatal() {
                    return Some(e);
                }
            }
        }
        debug!(entities = touched.len(), "Graph metadata refreshed");
        None
    }
}
