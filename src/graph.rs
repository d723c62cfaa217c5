//! Knowledge graph construction between archival entities

use crate::types::{
    ActivityRecord, EdgeType, EntityId, GraphMetadata, KnowledgeGraphEdge, W5hDimension,
};
use std::collections::BTreeSet;

/// Shared `what` tags needed for full semantic strength
const SEMANTIC_SATURATION: f64 = 10.0;
const PROJECT_STRENGTH: f64 = 0.9;
const PROJECT_PREFIX: &str = "project:";

/// Builds weighted edges from an entity to its most similar siblings
#[derive(Debug, Clone, Copy, Default)]
pub struct KnowledgeGraphBuilder;

struct SiblingMatch<'a> {
    sibling: &'a ActivityRecord,
    shared_what: BTreeSet<&'a str>,
    shared_projects: BTreeSet<&'a str>,
    shared_total: usize,
}

impl KnowledgeGraphBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Edges between `entity` and at most `limit` siblings per edge type
    ///
    /// Siblings are ranked by the number of concepts they share with the
    /// entity, ties broken by entity id. The entity itself is skipped if it
    /// appears among the siblings. Each edge runs from the smaller entity id
    /// to the larger, so linking A then B and linking B then A yield the
    /// same edge keys.
    pub fn build_edges(
        &self,
        entity: &ActivityRecord,
        siblings: &[ActivityRecord],
        limit: usize,
    ) -> Vec<KnowledgeGraphEdge> {
        let what = entity.w5h_concepts.get(W5hDimension::What);
        let projects = project_tags(entity);

        let mut matches: Vec<SiblingMatch<'_>> = siblings
            .iter()
            .filter(|s| s.entity_id != entity.entity_id)
            .filter_map(|sibling| {
                let shared_what: BTreeSet<&str> = sibling
                    .w5h_concepts
                    .get(W5hDimension::What)
                    .iter()
                    .filter(|tag| what.contains(*tag))
                    .map(String::as_str)
                    .collect();
                let shared_projects: BTreeSet<&str> = project_tags(sibling)
                    .into_iter()
                    .filter(|tag| projects.contains(tag))
                    .collect();
                if shared_what.is_empty() && shared_projects.is_empty() {
                    return None;
                }
                let shared_total = sibling
                    .semantic_concepts
                    .intersection(&entity.semantic_concepts)
                    .count();
                Some(SiblingMatch {
                    sibling,
                    shared_what,
                    shared_projects,
                    shared_total,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.shared_total
                .cmp(&a.shared_total)
                .then_with(|| b.shared_what.len().cmp(&a.shared_what.len()))
                .then_with(|| a.sibling.entity_id.cmp(&b.sibling.entity_id))
        });

        let semantic = matches
            .iter()
            .filter(|m| !m.shared_what.is_empty())
            .take(limit)
            .map(|m| semantic_edge(entity, m));
        let project = matches
            .iter()
            .filter(|m| !m.shared_projects.is_empty())
            .take(limit)
            .map(|m| project_edge(entity, m));

        semantic.chain(project).collect()
    }

    /// Metadata for an entity given every edge touching it
    pub fn metadata(&self, edges: &[KnowledgeGraphEdge]) -> GraphMetadata {
        GraphMetadata::from_edges(edges)
    }

    /// Far ends of a set of edges, deduplicated, in first-seen order
    pub fn neighbors(&self, entity_id: &str, edges: &[KnowledgeGraphEdge]) -> Vec<EntityId> {
        let mut seen = BTreeSet::new();
        edges
            .iter()
            .filter_map(|edge| edge.other_end(entity_id))
            .filter(|id| seen.insert(id.to_string()))
            .map(str::to_string)
            .collect()
    }
}

fn project_tags(record: &ActivityRecord) -> BTreeSet<&str> {
    record
        .w5h_concepts
        .get(W5hDimension::Why)
        .iter()
        .filter(|tag| tag.starts_with(PROJECT_PREFIX) && tag.len() > PROJECT_PREFIX.len())
        .map(String::as_str)
        .collect()
}

fn endpoints<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn semantic_edge(entity: &ActivityRecord, m: &SiblingMatch<'_>) -> KnowledgeGraphEdge {
    let n = m.shared_what.len();
    let shared: Vec<&str> = m.shared_what.iter().copied().collect();
    let (from, to) = endpoints(&entity.entity_id, &m.sibling.entity_id);
    KnowledgeGraphEdge::new(
        from,
        to,
        EdgeType::SemanticallyRelated,
        (n as f64 / SEMANTIC_SATURATION).min(1.0),
    )
    .with_semantic_type("shared_content_type")
    .with_common_concepts(n as u64)
    .with_description(format!("shares {}", shared.join(", ")))
}

fn project_edge(entity: &ActivityRecord, m: &SiblingMatch<'_>) -> KnowledgeGraphEdge {
    let names: Vec<&str> = m
        .shared_projects
        .iter()
        .map(|tag| &tag[PROJECT_PREFIX.len()..])
        .collect();
    let (from, to) = endpoints(&entity.entity_id, &m.sibling.entity_id);
    KnowledgeGraphEdge::new(
        from,
        to,
        EdgeType::ProjectRelated,
        PROJECT_STRENGTH,
    )
    .with_semantic_type("same_project")
    .with_common_concepts(m.shared_total as u64)
    .with_description(format!("both belong to project {}", names.join(", ")))
}
