//! Archival search: path substring, concept filters, importance ranking
//!
//! Hits can optionally carry their strongest knowledge-graph neighbours.

use crate::error::{Result, StrataError};
use crate::storage_backend::{SortKey, TierFilter, TierRegistry};
use crate::types::{ActivityRecord, GraphNeighbor, Tier, W5hConcepts};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Hard cap on hits per query
pub const MAX_RESULTS: usize = 1000;

/// Concept constraint; a query uses at most one kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "tags", rename_all = "snake_case")]
pub enum ConceptFilter {
    /// Every tag must appear in its W5H dimension
    W5h(W5hConcepts),
    /// Every tag must appear somewhere in the flattened concepts
    Concepts(BTreeSet<String>),
}

/// Search request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    /// Case-insensitive substring of the path
    pub query_text: Option<String>,
    pub filter: Option<ConceptFilter>,
    pub min_importance: Option<f64>,
    pub include_graph: bool,
    pub limit: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query_text: None,
            filter: None,
            min_importance: None,
            include_graph: false,
            limit: 20,
        }
    }
}

impl SearchQuery {
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query_text: Some(query.into()),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: ConceptFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn min_importance(mut self, importance: f64) -> Self {
        self.min_importance = Some(importance);
        self
    }

    pub fn include_graph(mut self, include: bool) -> Self {
        self.include_graph = include;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn to_filter(&self) -> Result<TierFilter> {
        let mut filter = TierFilter::new();
        if let Some(text) = self.query_text.as_deref().map(str::trim) {
            if !text.is_empty() {
                filter = filter.path_contains(text);
            }
        }
        if let Some(min) = self.min_importance {
            if !min.is_finite() || !(0.0..=1.0).contains(&min) {
                return Err(StrataError::Validation(format!(
                    "min_importance must be within [0, 1], got {min}"
                )));
            }
            filter = filter.min_importance(min);
        }
        match &self.filter {
            Some(ConceptFilter::W5h(w5h)) => filter = filter.require_w5h(w5h.clone()),
            Some(ConceptFilter::Concepts(tags)) => filter = filter.require_concepts(tags.clone()),
            None => {}
        }
        Ok(filter)
    }
}

/// One archival record plus optional graph neighbours
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub record: ActivityRecord,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub neighbors: Vec<GraphNeighbor>,
}

/// Cross-tier lookup over archival records
#[derive(Debug, Clone)]
pub struct SearchFacade {
    registry: TierRegistry,
    neighbor_limit: usize,
}

impl SearchFacade {
    pub fn new(registry: TierRegistry, neighbor_limit: usize) -> Self {
        Self {
            registry,
            neighbor_limit,
        }
    }

    /// Archival records matching `query`, highest importance first
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let filter = query.to_filter()?;
        let limit = query.limit.clamp(1, MAX_RESULTS);
        let store = self.registry.resolve(Tier::Archival)?;

        let records = store
            .query(Tier::Archival, &filter, SortKey::ImportanceDesc, Some(limit))
            .await?;

        let mut hits = Vec::with_capacity(records.len());
        for record in records {
            let neighbors = if query.include_graph && self.neighbor_limit > 0 {
                store
                    .edges_for(&record.entity_id, Some(self.neighbor_limit))
                    .await?
                    .into_iter()
                    .filter_map(|edge| {
                        edge.other_end(&record.entity_id).map(|other| GraphNeighbor {
                            entity_id: other.to_string(),
                            edge_type: edge.edge_type,
                            strength: edge.strength,
                            description: edge.description.clone(),
                        })
                    })
                    .collect()
            } else {
                Vec::new()
            };
            hits.push(SearchHit { record, neighbors });
        }

        tracing::debug!(
            query = query.query_text.as_deref().unwrap_or(""),
            hits = hits.len(),
            "Archival search"
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryTierStore;
    use crate::storage_backend::TierStore;
    use crate::types::{EdgeType, KnowledgeGraphEdge, W5hDimension};
    use std::sync::Arc;

    async fn seeded() -> (Arc<MemoryTierStore>, SearchFacade) {
        let store = MemoryTierStore::new();
        let docs = [
            ("a", "/home/ana/Documents/Report.docx", 0.9, "document"),
            ("b", "/home/ana/Documents/notes.txt", 0.7, "text"),
            ("c", "/home/ana/Pictures/cat.png", 0.95, "image"),
        ];
        for (id, path, importance, what) in docs {
            store
                .insert(
                    &ActivityRecord::new(id, path)
                        .with_tier(Tier::Archival)
                        .with_importance(importance)
                        .with_concepts(W5hConcepts::new().with(W5hDimension::What, &[what])),
                )
                .await
                .unwrap();
        }
        let facade = SearchFacade::new(TierRegistry::uniform(store.clone()), 5);
        (store, facade)
    }

    #[tokio::test]
    async fn text_search_ranks_by_importance() {
        let (_, facade) = seeded().await;
        let hits = facade.search(&SearchQuery::text("documents")).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.record.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn concept_filters_narrow_results() {
        let (_, facade) = seeded().await;

        let by_w5h = SearchQuery::default().with_filter(ConceptFilter::W5h(
            W5hConcepts::new().with(W5hDimension::What, &["image"]),
        ));
        let hits = facade.search(&by_w5h).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.entity_id, "c");

        let by_tags = SearchQuery::default()
            .with_filter(ConceptFilter::Concepts(["text".to_string()].into()))
            .min_importance(0.5);
        let hits = facade.search(&by_tags).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.entity_id, "b");
    }

    #[tokio::test]
    async fn graph_neighbours_are_attached() {
        let (store, facade) = seeded().await;
        store
            .insert_edge(
                &KnowledgeGraphEdge::new("a", "b", EdgeType::SemanticallyRelated, 0.1)
                    .with_description("shares document"),
            )
            .await
            .unwrap();

        let hits = facade
            .search(&SearchQuery::text("notes").include_graph(true))
            .await
            .unwrap();
        assert_eq!(hits[0].neighbors.len(), 1);
        assert_eq!(hits[0].neighbors[0].entity_id, "a");

        let plain = facade.search(&SearchQuery::text("notes")).await.unwrap();
        assert!(plain[0].neighbors.is_empty());
    }

    #[tokio::test]
    async fn bad_importance_is_rejected() {
        let (_, facade) = seeded().await;
        let result = facade.search(&SearchQuery::default().min_importance(2.0)).await;
        assert!(matches!(result, Err(StrataError::Validation(_))));
    }

    #[test]
    fn filter_serializes_with_kind_tag() {
        let query = SearchQuery::default().with_filter(ConceptFilter::Concepts(
            ["project_code".to_string()].into(),
        ));
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["filter"]["kind"], "concepts");
        assert_eq!(json["filter"]["tags"][0], "project_code");
    }
}
