//! Ontology enhancement for archival records
//!
//! Expands a record's W5H concepts into categories, inferred tags and typed
//! concept relationships. Output depends only on the input concepts.

use crate::types::{ConceptRelationship, Ontology, W5hConcepts, W5hDimension};
use std::collections::{BTreeMap, BTreeSet};

const CATEGORY_TABLE: &[(&str, W5hDimension, &[&str])] = &[
    (
        "document_types",
        W5hDimension::What,
        &["document", "text", "spreadsheet", "presentation"],
    ),
    ("code_types", W5hDimension::What, &["source_code", "script", "config"]),
    ("media_types", W5hDimension::What, &["image", "video", "audio"]),
    (
        "location_types",
        W5hDimension::Where,
        &[
            "documents_folder",
            "desktop",
            "downloads_folder",
            "media_folder",
            "work_directory",
            "source_directory",
            "cloud_storage",
            "temp_location",
        ],
    ),
    (
        "usage_patterns",
        W5hDimension::How,
        &[
            "frequently_modified",
            "work_in_progress",
            "recently_created",
            "read_mostly",
            "rarely_accessed",
            "renamed",
        ],
    ),
    (
        "purpose",
        W5hDimension::Why,
        &[
            "project_work",
            "work_related",
            "personal_use",
            "learning",
            "archival_backup",
        ],
    ),
];

/// Inferred tag plus the (dimension, tag) pairs that must all be present
struct InferenceRule {
    infers: &'static str,
    requires: &'static [(W5hDimension, &'static str)],
}

const INFERENCE_RULES: &[InferenceRule] = &[
    InferenceRule {
        infers: "work_document",
        requires: &[(W5hDimension::Why, "work_related"), (W5hDimension::What, "document")],
    },
    InferenceRule {
        infers: "project_code",
        requires: &[(W5hDimension::Why, "project_work"), (W5hDimension::What, "source_code")],
    },
    InferenceRule {
        infers: "personal_media",
        requires: &[(W5hDimension::Why, "personal_use"), (W5hDimension::Where, "media_folder")],
    },
    InferenceRule {
        infers: "active_document",
        requires: &[
            (W5hDimension::What, "document"),
            (W5hDimension::How, "frequently_modified"),
        ],
    },
    InferenceRule {
        infers: "current_focus",
        requires: &[
            (W5hDimension::When, "recent_week_activity"),
            (W5hDimension::How, "work_in_progress"),
        ],
    },
    InferenceRule {
        infers: "stale_download",
        requires: &[
            (W5hDimension::Where, "downloads_folder"),
            (W5hDimension::How, "rarely_accessed"),
        ],
    },
    InferenceRule {
        infers: "project_configuration",
        requires: &[(W5hDimension::Why, "project_work"), (W5hDimension::What, "config")],
    },
];

/// Artifact-type tags a person can work with
const ARTIFACT_TAGS: &[&str] = &[
    "document",
    "text",
    "spreadsheet",
    "presentation",
    "source_code",
    "script",
    "config",
    "image",
    "video",
    "audio",
    "archive",
];

const WORKS_WITH_CONFIDENCE: f64 = 0.8;
const STORED_IN_CONFIDENCE: f64 = 0.7;

/// Deterministic W5H to ontology expansion
#[derive(Debug, Clone, Copy, Default)]
pub struct OntologyEnhancer;

impl OntologyEnhancer {
    pub fn new() -> Self {
        Self
    }

    pub fn enhance(&self, w5h: &W5hConcepts) -> Ontology {
        let concepts = w5h.flatten();
        Ontology {
            w5h: w5h.clone(),
            categories: categorize(w5h),
            inferences: infer(w5h, &concepts),
            relationships: relate(w5h),
            concepts,
        }
    }
}

fn categorize(w5h: &W5hConcepts) -> BTreeMap<String, BTreeSet<String>> {
    let mut categories = BTreeMap::new();
    for (category, dimension, vocabulary) in CATEGORY_TABLE {
        let members: BTreeSet<String> = w5h
            .get(*dimension)
            .iter()
            .filter(|tag| vocabulary.contains(&tag.as_str()))
            .cloned()
            .collect();
        if !members.is_empty() {
            categories.insert(category.to_string(), members);
        }
    }
    categories
}

fn infer(w5h: &W5hConcepts, raw: &BTreeSet<String>) -> BTreeSet<String> {
    INFERENCE_RULES
        .iter()
        .filter(|rule| rule.requires.iter().all(|(dim, tag)| w5h.contains(*dim, tag)))
        .map(|rule| rule.infers)
        .filter(|tag| !raw.contains(*tag))
        .map(str::to_string)
        .collect()
}

fn relate(w5h: &W5hConcepts) -> Vec<ConceptRelationship> {
    let artifacts: Vec<&String> = w5h
        .get(W5hDimension::What)
        .iter()
        .filter(|tag| ARTIFACT_TAGS.contains(&tag.as_str()))
        .collect();

    let mut relationships = Vec::new();
    for person in w5h.get(W5hDimension::Who).iter().filter(|t| t.starts_with("user:")) {
        for artifact in &artifacts {
            relationships.push(ConceptRelationship::new(
                person.as_str(),
                "works_with",
                artifact.as_str(),
                WORKS_WITH_CONFIDENCE,
            ));
        }
    }

    let folders = w5h
        .get(W5hDimension::Where)
        .iter()
        .filter(|tag| tag.ends_with("folder"));
    for location in folders {
        for artifact in w5h.get(W5hDimension::What) {
            relationships.push(ConceptRelationship::new(
                artifact.as_str(),
                "stored_in",
                location.as_str(),
                STORED_IN_CONFIDENCE,
            ));
        }
    }
    relationships
}
