//! In-process tier store backed by hash maps

use crate::error::{Result, StrataError};
use crate::storage_backend::{RecordPatch, SortKey, TierFilter, TierStore};
use crate::types::{ActivityRecord, EdgeType, EntityId, KnowledgeGraphEdge, Tier};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

type EdgeKey = (EntityId, EntityId, EdgeType);

/// Tier store that keeps every record in memory
///
/// Each call takes a single lock, so `update` is atomic per record.
#[derive(Default)]
pub struct MemoryTierStore {
    records: RwLock<HashMap<(Tier, EntityId), ActivityRecord>>,
    edges: RwLock<BTreeMap<EdgeKey, KnowledgeGraphEdge>>,
}

impl std::fmt::Debug for MemoryTierStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTierStore").finish_non_exhaustive()
    }
}

impl MemoryTierStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every record in a tier, unsorted
    pub async fn snapshot(&self, tier: Tier) -> Vec<ActivityRecord> {
        let records = self.records.read().await;
        records
            .iter()
            .filter(|((t, _), _)| *t == tier)
            .map(|(_, record)| record.clone())
            .collect()
    }
}

#[async_trait]
impl TierStore for MemoryTierStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn query(
        &self,
        tier: Tier,
        filter: &TierFilter,
        sort: SortKey,
        limit: Option<usize>,
    ) -> Result<Vec<ActivityRecord>> {
        let records = self.records.read().await;
        let mut matched: Vec<ActivityRecord> = records
            .iter()
            .filter(|((t, _), record)| *t == tier && filter.matches(record))
            .map(|(_, record)| record.clone())
            .collect();
        drop(records);

        matched.sort_by(|a, b| sort.compare(a, b));
        if let Some(limit) = limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn insert(&self, record: &ActivityRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let key = (record.tier, record.entity_id.clone());
        if records.contains_key(&key) {
            return Err(StrataError::AlreadyExists {
                tier: record.tier,
                entity_id: record.entity_id.clone(),
            });
        }
        records.insert(key, record.clone());
        Ok(())
    }

    async fn update(&self, tier: Tier, entity_id: &str, patch: &RecordPatch) -> Result<()> {
        let mut records = self.records.write().await;
        match records.get_mut(&(tier, entity_id.to_string())) {
            Some(record) => {
                patch.apply(record);
                Ok(())
            }
            None => Err(StrataError::NotFound(format!("{tier}/{entity_id}"))),
        }
    }

    async fn exists(&self, tier: Tier, entity_id: &str) -> Result<bool> {
        let records = self.records.read().await;
        Ok(records.contains_key(&(tier, entity_id.to_string())))
    }

    async fn get(&self, tier: Tier, entity_id: &str) -> Result<Option<ActivityRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&(tier, entity_id.to_string())).cloned())
    }

    async fn count(&self, tier: Tier, filter: &TierFilter) -> Result<u64> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|((t, _), record)| *t == tier && filter.matches(record))
            .count() as u64)
    }

    async fn mean_importance(&self, tier: Tier, filter: &TierFilter) -> Result<Option<f64>> {
        let records = self.records.read().await;
        let (sum, n) = records
            .iter()
            .filter(|((t, _), record)| *t == tier && filter.matches(record))
            .fold((0.0, 0u64), |(sum, n), (_, record)| (sum + record.importance_score, n + 1));
        Ok((n > 0).then(|| sum / n as f64))
    }

    async fn insert_edge(&self, edge: &KnowledgeGraphEdge) -> Result<bool> {
        let mut edges = self.edges.write().await;
        let key = (edge.from_entity.clone(), edge.to_entity.clone(), edge.edge_type);
        if edges.contains_key(&key) {
            return Ok(false);
        }
        edges.insert(key, edge.clone());
        Ok(true)
    }

    async fn edges_for(
        &self,
        entity_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<KnowledgeGraphEdge>> {
        let edges = self.edges.read().await;
        let mut touching: Vec<KnowledgeGraphEdge> = edges
            .values()
            .filter(|edge| edge.from_entity == entity_id || edge.to_entity == entity_id)
            .cloned()
            .collect();
        drop(edges);

        touching.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        if let Some(limit) = limit {
            touching.truncate(limit);
        }
        Ok(touching)
    }

    async fn count_edges(&self) -> Result<u64> {
        Ok(self.edges.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_twice_reports_already_exists() {
        let store = MemoryTierStore::new();
        let record = ActivityRecord::new("e1", "/tmp/a.txt");

        store.insert(&record).await.unwrap();
        let err = store.insert(&record).await.unwrap_err();
        assert!(err.is_already_exists());

        // Same id in another tier is a different document
        let promoted = record.clone().with_tier(Tier::ShortTerm);
        store.insert(&promoted).await.unwrap();
        assert!(store.exists(Tier::ShortTerm, "e1").await.unwrap());
    }

    #[tokio::test]
    async fn query_sorts_and_limits() {
        let store = MemoryTierStore::new();
        for (id, importance) in [("a", 0.2), ("b", 0.9), ("c", 0.5)] {
            store
                .insert(&ActivityRecord::new(id, format!("/data/{id}")).with_importance(importance))
                .await
                .unwrap();
        }

        let top = store
            .query(Tier::Sensory, &TierFilter::new(), SortKey::ImportanceDesc, Some(2))
            .await
            .unwrap();
        let ids: Vec<&str> = top.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn update_only_touches_patched_fields() {
        let store = MemoryTierStore::new();
        store
            .insert(&ActivityRecord::new("e1", "/a").with_importance(0.4))
            .await
            .unwrap();

        store
            .update(Tier::Sensory, "e1", &RecordPatch::mark_consolidated())
            .await
            .unwrap();
        let record = store.get(Tier::Sensory, "e1").await.unwrap().unwrap();
        assert!(record.consolidated_to_next);
        assert_eq!(record.importance_score, 0.4);

        let missing = store
            .update(Tier::Sensory, "nope", &RecordPatch::mark_consolidated())
            .await;
        assert!(matches!(missing, Err(StrataError::NotFound(_))));
    }

    #[tokio::test]
    async fn edges_are_keyed_by_endpoints_and_type() {
        let store = MemoryTierStore::new();
        let edge = KnowledgeGraphEdge::new("a", "b", EdgeType::SemanticallyRelated, 0.3);
        assert!(store.insert_edge(&edge).await.unwrap());
        assert!(!store.insert_edge(&edge).await.unwrap());
        assert!(store
            .insert_edge(&KnowledgeGraphEdge::new("a", "b", EdgeType::ProjectRelated, 0.9))
            .await
            .unwrap());

        assert_eq!(store.count_edges().await.unwrap(), 2);
        let edges = store.edges_for("b", None).await.unwrap();
        assert_eq!(edges[0].edge_type, EdgeType::ProjectRelated);
    }

    #[test]
    fn count_uses_filter() {
        let store = MemoryTierStore::new();
        tokio_test::block_on(async {
            store.insert(&ActivityRecord::new("a", "/a").with_importance(0.9)).await.unwrap();
            store.insert(&ActivityRecord::new("b", "/b").with_importance(0.1)).await.unwrap();

            let high = TierFilter::new().min_importance(0.5);
            assert_eq!(store.count(Tier::Sensory, &high).await.unwrap(), 1);
            assert_eq!(store.count(Tier::ShortTerm, &TierFilter::new()).await.unwrap(), 0);

            let mean = store.mean_importance(Tier::Sensory, &TierFilter::new()).await.unwrap();
            assert!((mean.unwrap() - 0.5).abs() < 1e-9);
            assert_eq!(store.mean_importance(Tier::ShortTerm, &TierFilter::new()).await.unwrap(), None);
        });
    }
}
