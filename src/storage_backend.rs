//! Tier store interface and dependency registry

use crate::error::{Result, StrataError};
use crate::types::{ActivityRecord, GraphMetadata, KnowledgeGraphEdge, Tier, W5hConcepts};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Filter over one tier's records. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct TierFilter {
    pub min_importance: Option<f64>,
    /// Strict upper bound on importance
    pub importance_below: Option<f64>,
    pub first_seen_before: Option<DateTime<Utc>>,
    pub consolidated: Option<bool>,
    /// Case-insensitive substring of the path
    pub path_contains: Option<String>,
    /// Every tag must appear in `semantic_concepts`
    pub required_concepts: BTreeSet<String>,
    /// Every tag must appear in the matching W5H dimension
    pub required_w5h: Option<W5hConcepts>,
}

impl TierFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_importance(mut self, importance: f64) -> Self {
        self.min_importance = Some(importance);
        self
    }

    pub fn importance_below(mut self, importance: f64) -> Self {
        self.importance_below = Some(importance);
        self
    }

    pub fn first_seen_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.first_seen_before = Some(cutoff);
        self
    }

    pub fn consolidated(mut self, consolidated: bool) -> Self {
        self.consolidated = Some(consolidated);
        self
    }

    pub fn path_contains(mut self, needle: impl Into<String>) -> Self {
        self.path_contains = Some(needle.into());
        self
    }

    pub fn require_concepts(mut self, concepts: BTreeSet<String>) -> Self {
        self.required_concepts = concepts;
        self
    }

    pub fn require_w5h(mut self, concepts: W5hConcepts) -> Self {
        self.required_w5h = Some(concepts);
        self
    }

    /// Evaluate the filter against a record in memory
    pub fn matches(&self, record: &ActivityRecord) -> bool {
        if self.min_importance.is_some_and(|min| record.importance_score < min) {
            return false;
        }
        if self
            .importance_below
            .is_some_and(|max| record.importance_score >= max)
        {
            return false;
        }
        if self
            .first_seen_before
            .is_some_and(|cutoff| record.first_seen > cutoff)
        {
            return false;
        }
        if self
            .consolidated
            .is_some_and(|flag| record.consolidated_to_next != flag)
        {
            return false;
        }
        if let Some(needle) = &self.path_contains {
            if !record.path.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        self.matches_concepts(record)
    }

    /// Evaluate only the concept constraints
    pub fn matches_concepts(&self, record: &ActivityRecord) -> bool {
        if !self
            .required_concepts
            .iter()
            .all(|tag| record.semantic_concepts.contains(tag))
        {
            return false;
        }
        if let Some(required) = &self.required_w5h {
            for (dim, tags) in required.iter() {
                if !tags.iter().all(|tag| record.w5h_concepts.contains(dim, tag)) {
                    return false;
                }
            }
        }
        true
    }
}

/// Result ordering for tier queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    /// Highest importance first
    #[default]
    ImportanceDesc,
    /// Oldest first
    FirstSeenAsc,
    /// Most recently modified first
    LastModifiedDesc,
}

impl SortKey {
    pub fn compare(&self, a: &ActivityRecord, b: &ActivityRecord) -> std::cmp::Ordering {
        let ordering = match self {
            SortKey::ImportanceDesc => b.importance_score.total_cmp(&a.importance_score),
            SortKey::FirstSeenAsc => a.first_seen.cmp(&b.first_seen),
            SortKey::LastModifiedDesc => b.last_modified.cmp(&a.last_modified),
        };
        ordering.then_with(|| a.entity_id.cmp(&b.entity_id))
    }
}

/// The only mutations a stage may apply to an existing record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub consolidated_to_next: Option<bool>,
    pub graph: Option<GraphMetadata>,
}

impl RecordPatch {
    pub fn mark_consolidated() -> Self {
        Self {
            consolidated_to_next: Some(true),
            graph: None,
        }
    }

    pub fn graph(metadata: GraphMetadata) -> Self {
        Self {
            consolidated_to_next: None,
            graph: Some(metadata),
        }
    }

    pub fn apply(&self, record: &mut ActivityRecord) {
        if let Some(flag) = self.consolidated_to_next {
            record.consolidated_to_next = flag;
        }
        if let Some(graph) = &self.graph {
            record.graph = Some(graph.clone());
        }
    }
}

/// Document store the engine runs against
///
/// Implementations must make `update` atomic per record. Nothing here needs
/// multi-record transactions.
#[async_trait]
pub trait TierStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Records of `tier` matching `filter`, sorted, at most `limit` of them
    async fn query(
        &self,
        tier: Tier,
        filter: &TierFilter,
        sort: SortKey,
        limit: Option<usize>,
    ) -> Result<Vec<ActivityRecord>>;

    /// Insert into `record.tier`; fails with `AlreadyExists` if the key is taken
    async fn insert(&self, record: &ActivityRecord) -> Result<()>;

    /// Apply a patch to one record; `NotFound` if it does not exist
    async fn update(&self, tier: Tier, entity_id: &str, patch: &RecordPatch) -> Result<()>;

    async fn exists(&self, tier: Tier, entity_id: &str) -> Result<bool>;

    async fn get(&self, tier: Tier, entity_id: &str) -> Result<Option<ActivityRecord>>;

    async fn count(&self, tier: Tier, filter: &TierFilter) -> Result<u64>;

    /// Mean importance of the matching records; `None` when nothing matches
    async fn mean_importance(&self, tier: Tier, filter: &TierFilter) -> Result<Option<f64>>;

    /// Insert an edge; re-inserting the same (from, to, type) key is a no-op.
    /// Returns whether the edge was new.
    async fn insert_edge(&self, edge: &KnowledgeGraphEdge) -> Result<bool>;

    /// Edges touching an entity, strongest first
    async fn edges_for(&self, entity_id: &str, limit: Option<usize>)
        -> Result<Vec<KnowledgeGraphEdge>>;

    async fn count_edges(&self) -> Result<u64>;
}

/// Which store serves which tier
///
/// A tier with no registered store makes every stage touching it fail with
/// `DependencyUnavailable`.
#[derive(Clone, Default)]
pub struct TierRegistry {
    stores: HashMap<Tier, Arc<dyn TierStore>>,
}

impl std::fmt::Debug for TierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tiers: Vec<(Tier, &'static str)> = self
            .stores
            .iter()
            .map(|(tier, store)| (*tier, store.backend_name()))
            .collect();
        tiers.sort();
        f.debug_struct("TierRegistry").field("stores", &tiers).finish()
    }
}

impl TierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One store serving every tier
    pub fn uniform(store: Arc<dyn TierStore>) -> Self {
        let mut registry = Self::new();
        for tier in Tier::ALL {
            registry.stores.insert(*tier, Arc::clone(&store));
        }
        registry
    }

    pub fn with_tier(mut self, tier: Tier, store: Arc<dyn TierStore>) -> Self {
        self.stores.insert(tier, store);
        self
    }

    pub fn without_tier(mut self, tier: Tier) -> Self {
        self.stores.remove(&tier);
        self
    }

    pub fn resolve(&self, tier: Tier) -> Result<Arc<dyn TierStore>> {
        self.stores.get(&tier).cloned().ok_or_else(|| {
            StrataError::DependencyUnavailable(format!("no store registered for tier {tier}"))
        })
    }

    pub fn is_registered(&self, tier: Tier) -> bool {
        self.stores.contains_key(&tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::W5hDimension;
    use chrono::Duration;

    #[test]
    fn filter_matches_thresholds_and_flag() {
        let now = Utc::now();
        let record = ActivityRecord::new("e1", "/home/ana/Documents/plan.docx")
            .with_first_seen(now - Duration::days(10))
            .with_importance(0.6);

        let eligible = TierFilter::new()
            .min_importance(0.5)
            .first_seen_before(now - Duration::days(7))
            .consolidated(false);
        assert!(eligible.matches(&record));

        assert!(!TierFilter::new().min_importance(0.7).matches(&record));
        assert!(!TierFilter::new().importance_below(0.6).matches(&record));
        assert!(!TierFilter::new()
            .first_seen_before(now - Duration::days(30))
            .matches(&record));
        assert!(TierFilter::new().path_contains("DOCUMENTS").matches(&record));
    }

    #[test]
    fn filter_requires_every_concept() {
        let record = ActivityRecord::new("e1", "/x").with_concepts(
            W5hConcepts::new()
                .with(W5hDimension::What, &["document"])
                .with(W5hDimension::Why, &["work_related"]),
        );

        let by_w5h = TierFilter::new()
            .require_w5h(W5hConcepts::new().with(W5hDimension::What, &["document"]));
        assert!(by_w5h.matches(&record));

        let wrong_dim = TierFilter::new()
            .require_w5h(W5hConcepts::new().with(W5hDimension::Why, &["document"]));
        assert!(!wrong_dim.matches(&record));

        let flat: BTreeSet<String> = ["document".to_string(), "image".to_string()].into();
        assert!(!TierFilter::new().require_concepts(flat).matches(&record));
    }

    #[test]
    fn registry_reports_missing_tier() {
        let registry = TierRegistry::new();
        let err = registry.resolve(Tier::LongTerm).err().unwrap();
        assert!(matches!(err, StrataError::DependencyUnavailable(_)));
    }
}
