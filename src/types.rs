//! Tiered activity records, W5H concepts, and knowledge-graph structures

use crate::error::{Result, StrataError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Opaque identifier for a logical file, stable across tiers
pub type EntityId = String;

static NO_TAGS: BTreeSet<String> = BTreeSet::new();

/// Retention tiers an activity record moves through
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Raw activity written by collectors
    Sensory,
    /// Recently consolidated, scored and tagged
    ShortTerm,
    /// Stable records that survived a week or more
    LongTerm,
    /// Permanent, ontology-enriched and graph-linked
    Archival,
}

impl Tier {
    /// All tiers in promotion order
    pub const ALL: &[Tier] = &[Tier::Sensory, Tier::ShortTerm, Tier::LongTerm, Tier::Archival];

    /// The tier a record is promoted into, if any
    pub fn next(&self) -> Option<Tier> {
        match self {
            Tier::Sensory => Some(Tier::ShortTerm),
            Tier::ShortTerm => Some(Tier::LongTerm),
            Tier::LongTerm => Some(Tier::Archival),
            Tier::Archival => None,
        }
    }

    /// The tier a record is promoted from, if any
    pub fn previous(&self) -> Option<Tier> {
        match self {
            Tier::Sensory => None,
            Tier::ShortTerm => Some(Tier::Sensory),
            Tier::LongTerm => Some(Tier::ShortTerm),
            Tier::Archival => Some(Tier::LongTerm),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Sensory => "sensory",
            Tier::ShortTerm => "short_term",
            Tier::LongTerm => "long_term",
            Tier::Archival => "archival",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sensory" => Ok(Tier::Sensory),
            "short_term" => Ok(Tier::ShortTerm),
            "long_term" => Ok(Tier::LongTerm),
            "archival" => Ok(Tier::Archival),
            other => Err(StrataError::Validation(format!("unknown tier '{other}'"))),
        }
    }
}

/// Kind of low-level filesystem activity observed by a collector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Create,
    Modify,
    Read,
    Rename,
    Delete,
    SecurityChange,
}

impl ActivityType {
    pub const ALL: &[ActivityType] = &[
        ActivityType::Create,
        ActivityType::Modify,
        ActivityType::Read,
        ActivityType::Rename,
        ActivityType::Delete,
        ActivityType::SecurityChange,
    ];

    /// Whether this activity changes the file rather than observing it
    pub fn is_write(&self) -> bool {
        !matches!(self, ActivityType::Read)
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityType::Create => write!(f, "create"),
            ActivityType::Modify => write!(f, "modify"),
            ActivityType::Read => write!(f, "read"),
            ActivityType::Rename => write!(f, "rename"),
            ActivityType::Delete => write!(f, "delete"),
            ActivityType::SecurityChange => write!(f, "security_change"),
        }
    }
}

/// Activity counts by type plus the observed span
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActivitySummary {
    pub counts: BTreeMap<ActivityType, u64>,
    /// Days between the first and last observed activity
    pub span_days: f64,
}

impl ActivitySummary {
    pub fn record(&mut self, activity: ActivityType, count: u64) {
        *self.counts.entry(activity).or_insert(0) += count;
    }

    pub fn count(&self, activity: ActivityType) -> u64 {
        self.counts.get(&activity).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn writes(&self) -> u64 {
        self.counts
            .iter()
            .filter(|(activity, _)| activity.is_write())
            .map(|(_, count)| count)
            .sum()
    }

    /// Activity types with at least one observation
    pub fn observed(&self) -> impl Iterator<Item = ActivityType> + '_ {
        self.counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(activity, _)| *activity)
    }
}

/// The six fixed concept dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum W5hDimension {
    Who,
    What,
    When,
    Where,
    Why,
    How,
}

impl W5hDimension {
    pub const ALL: &[W5hDimension] = &[
        W5hDimension::Who,
        W5hDimension::What,
        W5hDimension::When,
        W5hDimension::Where,
        W5hDimension::Why,
        W5hDimension::How,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            W5hDimension::Who => "who",
            W5hDimension::What => "what",
            W5hDimension::When => "when",
            W5hDimension::Where => "where",
            W5hDimension::Why => "why",
            W5hDimension::How => "how",
        }
    }
}

impl std::fmt::Display for W5hDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concept tags per W5H dimension, each an ordered set
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct W5hConcepts(BTreeMap<W5hDimension, BTreeSet<String>>);

impl W5hConcepts {
    /// Empty concepts with all six dimensions present
    pub fn new() -> Self {
        Self(
            W5hDimension::ALL
                .iter()
                .map(|dim| (*dim, BTreeSet::new()))
                .collect(),
        )
    }

    pub fn insert(&mut self, dimension: W5hDimension, tag: impl Into<String>) {
        self.0.entry(dimension).or_default().insert(tag.into());
    }

    pub fn with(mut self, dimension: W5hDimension, tags: &[&str]) -> Self {
        for tag in tags {
            self.insert(dimension, *tag);
        }
        self
    }

    pub fn get(&self, dimension: W5hDimension) -> &BTreeSet<String> {
        self.0.get(&dimension).unwrap_or(&NO_TAGS)
    }

    pub fn contains(&self, dimension: W5hDimension, tag: &str) -> bool {
        self.get(dimension).contains(tag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|tags| tags.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (W5hDimension, &BTreeSet<String>)> {
        self.0.iter().map(|(dim, tags)| (*dim, tags))
    }

    /// Deduplicated union of every dimension
    pub fn flatten(&self) -> BTreeSet<String> {
        self.0.values().flatten().cloned().collect()
    }

    pub fn merge(&mut self, other: &W5hConcepts) {
        for (dim, tags) in other.iter() {
            for tag in tags {
                self.insert(dim, tag.clone());
            }
        }
    }

    /// Stable textual encoding, used as a cache key
    pub fn canonical_key(&self) -> String {
        W5hDimension::ALL
            .iter()
            .map(|dim| {
                let tags: Vec<&str> = self.get(*dim).iter().map(String::as_str).collect();
                format!("{}={}", dim, tags.join(","))
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// One step in a record's promotion history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineageTransition {
    pub from_tier: Tier,
    pub to_tier: Tier,
    pub transition_date: DateTime<Utc>,
    pub importance_at_transition: f64,
}

impl LineageTransition {
    /// Create a transition, rejecting skipped or reversed tiers
    pub fn new(
        from_tier: Tier,
        to_tier: Tier,
        transition_date: DateTime<Utc>,
        importance_at_transition: f64,
    ) -> Result<Self> {
        if from_tier.next() != Some(to_tier) {
            return Err(StrataError::Validation(format!(
                "invalid lineage transition {from_tier} -> {to_tier}"
            )));
        }
        Ok(Self {
            from_tier,
            to_tier,
            transition_date,
            importance_at_transition: importance_at_transition.clamp(0.0, 1.0),
        })
    }
}

/// A concept-to-concept semantic link inside an ontology
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConceptRelationship {
    pub source: String,
    pub relation: String,
    pub target: String,
    pub confidence: f64,
}

impl ConceptRelationship {
    pub fn new(
        source: impl Into<String>,
        relation: impl Into<String>,
        target: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            source: source.into(),
            relation: relation.into(),
            target: target.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Enriched concept structure attached to archival records
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Ontology {
    pub w5h: W5hConcepts,
    pub concepts: BTreeSet<String>,
    pub categories: BTreeMap<String, BTreeSet<String>>,
    pub inferences: BTreeSet<String>,
    pub relationships: Vec<ConceptRelationship>,
}

/// Kind of edge between two archival entities
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    SemanticallyRelated,
    ProjectRelated,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::SemanticallyRelated => "semantically_related",
            EdgeType::ProjectRelated => "project_related",
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EdgeType {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "semantically_related" => Ok(EdgeType::SemanticallyRelated),
            "project_related" => Ok(EdgeType::ProjectRelated),
            other => Err(StrataError::Validation(format!("unknown edge type '{other}'"))),
        }
    }
}

/// Weighted relationship between two archival entities (graph edge)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeGraphEdge {
    pub from_entity: EntityId,
    pub to_entity: EntityId,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub semantic_type: String,
    /// Strength of the relationship (0.0 - 1.0)
    pub strength: f64,
    pub created_at: DateTime<Utc>,
    pub common_concepts: u64,
    pub description: String,
}

impl KnowledgeGraphEdge {
    pub fn new(
        from_entity: impl Into<EntityId>,
        to_entity: impl Into<EntityId>,
        edge_type: EdgeType,
        strength: f64,
    ) -> Self {
        Self {
            from_entity: from_entity.into(),
            to_entity: to_entity.into(),
            edge_type,
            semantic_type: String::new(),
            strength: strength.clamp(0.0, 1.0),
            created_at: Utc::now(),
            common_concepts: 0,
            description: String::new(),
        }
    }

    pub fn with_semantic_type(mut self, semantic_type: impl Into<String>) -> Self {
        self.semantic_type = semantic_type.into();
        self
    }

    pub fn with_common_concepts(mut self, count: u64) -> Self {
        self.common_concepts = count;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The entity on the other end of this edge, if `entity_id` is on it
    pub fn other_end(&self, entity_id: &str) -> Option<&str> {
        if self.from_entity == entity_id {
            Some(&self.to_entity)
        } else if self.to_entity == entity_id {
            Some(&self.from_entity)
        } else {
            None
        }
    }
}

/// Graph metadata kept on an archival record
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GraphMetadata {
    pub relationship_count: u64,
    pub centrality: f64,
    pub relationship_types: BTreeSet<EdgeType>,
}

impl GraphMetadata {
    pub fn from_edges(edges: &[KnowledgeGraphEdge]) -> Self {
        let relationship_count = edges.len() as u64;
        Self {
            relationship_count,
            centrality: (relationship_count as f64 / 20.0).min(1.0),
            relationship_types: edges.iter().map(|e| e.edge_type).collect(),
        }
    }
}

/// A file's activity record as stored in one tier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityRecord {
    pub entity_id: EntityId,
    pub tier: Tier,
    pub path: String,
    #[serde(default)]
    pub volume: String,
    #[serde(default)]
    pub is_directory: bool,
    pub first_seen: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub activity_summary: ActivitySummary,
    /// Importance score (0.0 - 1.0)
    pub importance_score: f64,
    #[serde(default = "W5hConcepts::new")]
    pub w5h_concepts: W5hConcepts,
    #[serde(default)]
    pub semantic_concepts: BTreeSet<String>,
    #[serde(default)]
    pub consolidated_to_next: bool,
    #[serde(default)]
    pub memory_lineage: Vec<LineageTransition>,
    /// Archival only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ontology: Option<Ontology>,
    /// Archival only, written after edge construction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphMetadata>,
    /// Raw collector attributes with no fixed shape
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl ActivityRecord {
    /// Create a sensory record first seen now
    pub fn new(entity_id: impl Into<EntityId>, path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            entity_id: entity_id.into(),
            tier: Tier::Sensory,
            path: path.into(),
            volume: String::new(),
            is_directory: false,
            first_seen: now,
            last_modified: now,
            last_accessed: now,
            activity_summary: ActivitySummary::default(),
            importance_score: 0.1,
            w5h_concepts: W5hConcepts::new(),
            semantic_concepts: BTreeSet::new(),
            consolidated_to_next: false,
            memory_lineage: Vec::new(),
            ontology: None,
            graph: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_volume(mut self, volume: impl Into<String>) -> Self {
        self.volume = volume.into();
        self
    }

    pub fn as_directory(mut self) -> Self {
        self.is_directory = true;
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_first_seen(mut self, at: DateTime<Utc>) -> Self {
        self.first_seen = at;
        if self.last_modified < at {
            self.last_modified = at;
        }
        if self.last_accessed < at {
            self.last_accessed = at;
        }
        self
    }

    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = at;
        self
    }

    pub fn with_last_accessed(mut self, at: DateTime<Utc>) -> Self {
        self.last_accessed = at;
        self
    }

    /// Set the importance score, clamped to [0, 1]
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance_score = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_activity(mut self, activity: ActivityType, count: u64) -> Self {
        self.activity_summary.record(activity, count);
        self
    }

    pub fn with_concepts(mut self, concepts: W5hConcepts) -> Self {
        self.semantic_concepts = concepts.flatten();
        self.w5h_concepts = concepts;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Lowercased file extension without the dot
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    pub fn file_name(&self) -> &str {
        self.path
            .rsplit(['/', '\\'])
            .find(|segment| !segment.is_empty())
            .unwrap_or("")
    }

    /// Path components, lowercased, with drive prefixes and empty segments dropped
    pub fn path_segments(&self) -> Vec<String> {
        self.path
            .split(['/', '\\'])
            .filter(|segment| !segment.is_empty() && !segment.ends_with(':'))
            .map(|segment| segment.to_lowercase())
            .collect()
    }

    /// Most recent of modification and access
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_modified.max(self.last_accessed)
    }

    /// Age in days since the record was first seen
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.first_seen).num_seconds() as f64 / 86_400.0
    }

    /// Rebuild the flattened concept set from the W5H map
    pub fn refresh_semantic_concepts(&mut self) {
        self.semantic_concepts = self.w5h_concepts.flatten();
    }

    /// Check the invariants a record must hold before it can be promoted
    pub fn validate(&self) -> Result<()> {
        if self.entity_id.trim().is_empty() {
            return Err(StrataError::Validation("record has an empty entity_id".into()));
        }
        if self.path.trim().is_empty() {
            return Err(StrataError::Validation(format!(
                "record {} has an empty path",
                self.entity_id
            )));
        }
        if !self.importance_score.is_finite() || !(0.0..=1.0).contains(&self.importance_score) {
            return Err(StrataError::Validation(format!(
                "record {} has importance {} outside [0, 1]",
                self.entity_id, self.importance_score
            )));
        }

        let mut expected_from = Tier::Sensory;
        let mut previous_date: Option<DateTime<Utc>> = None;
        for transition in &self.memory_lineage {
            if transition.from_tier != expected_from
                || transition.from_tier.next() != Some(transition.to_tier)
            {
                return Err(StrataError::Validation(format!(
                    "record {} has out-of-order lineage {} -> {}",
                    self.entity_id, transition.from_tier, transition.to_tier
                )));
            }
            if previous_date.is_some_and(|prev| transition.transition_date < prev) {
                return Err(StrataError::Validation(format!(
                    "record {} has lineage timestamps going backwards",
                    self.entity_id
                )));
            }
            previous_date = Some(transition.transition_date);
            expected_from = transition.to_tier;
        }
        if expected_from != self.tier {
            return Err(StrataError::Validation(format!(
                "record {} is in tier {} but its lineage ends at {}",
                self.entity_id, self.tier, expected_from
            )));
        }

        Ok(())
    }
}

/// Knowledge-graph neighbour attached to a search hit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNeighbor {
    pub entity_id: EntityId,
    pub edge_type: EdgeType,
    pub strength: f64,
    pub description: String,
}
