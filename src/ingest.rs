//! Sensory recorder: turns raw collector events into Sensory-tier records

use crate::concepts::ConceptExtractor;
use crate::error::{Result, StrataError};
use crate::importance::ImportanceScorer;
use crate::storage_backend::TierStore;
use crate::types::{ActivityRecord, ActivityType, EntityId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One low-level event as reported by a collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawActivity {
    /// Collector-assigned id; derived from volume and path when absent
    #[serde(default)]
    pub entity_id: Option<EntityId>,
    pub path: String,
    #[serde(default)]
    pub volume: String,
    #[serde(default)]
    pub is_directory: bool,
    pub activity: ActivityType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl RawActivity {
    pub fn new(path: impl Into<String>, activity: ActivityType, timestamp: DateTime<Utc>) -> Self {
        Self {
            entity_id: None,
            path: path.into(),
            volume: String::new(),
            is_directory: false,
            activity,
            timestamp,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<EntityId>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn resolved_id(&self) -> EntityId {
        match &self.entity_id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => {
                let path = self.path.replace('\\', "/");
                if self.volume.is_empty() {
                    path.to_lowercase()
                } else {
                    format!("{}:{}", self.volume, path).to_lowercase()
                }
            }
        }
    }
}

/// Outcome of one recorded batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub received: u64,
    pub entities: u64,
    pub inserted: u64,
    /// Entities already present in the Sensory tier
    pub duplicates: u64,
    pub rejected: u64,
}

/// Aggregates raw events per entity and writes scored, tagged Sensory records
pub struct SensoryRecorder {
    store: Arc<dyn TierStore>,
    scorer: ImportanceScorer,
    extractor: ConceptExtractor,
}

impl std::fmt::Debug for SensoryRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensoryRecorder")
            .field("backend", &self.store.backend_name())
            .finish_non_exhaustive()
    }
}

impl SensoryRecorder {
    pub fn new(store: Arc<dyn TierStore>, scorer: ImportanceScorer) -> Self {
        Self {
            store,
            scorer,
            extractor: ConceptExtractor::new(),
        }
    }

    /// Record a batch of events
    ///
    /// Events are grouped by entity. Existing Sensory records are never
    /// modified; a second batch for the same entity counts as a duplicate.
    pub async fn record(&self, events: Vec<RawActivity>) -> Result<IngestReport> {
        let mut report = IngestReport {
            received: events.len() as u64,
            ..IngestReport::default()
        };

        let mut grouped: BTreeMap<EntityId, Vec<RawActivity>> = BTreeMap::new();
        for event in events {
            if event.path.trim().is_empty() {
                warn!("Rejected activity with an empty path");
                report.rejected += 1;
                continue;
            }
            grouped.entry(event.resolved_id()).or_default().push(event);
        }
        report.entities = grouped.len() as u64;

        let now = Utc::now();
        for (entity_id, events) in grouped {
            let record = self.aggregate(entity_id, &events, now);
            if let Err(e) = record.validate() {
                warn!(entity_id = %record.entity_id, error = %e, "Rejected activity record");
                report.rejected += 1;
                continue;
            }

            match self.store.insert(&record).await {
                Ok(()) => {
                    debug!(
                        entity_id = %record.entity_id,
                        importance = record.importance_score,
                        "Recorded sensory activity"
                    );
                    report.inserted += 1;
                }
                Err(StrataError::AlreadyExists { .. }) => report.duplicates += 1,
                Err(e) if e.is_stage_fatal() => return Err(e),
                Err(e) => {
                    warn!(entity_id = %record.entity_id, error = %e, "Failed to record activity");
                    report.rejected += 1;
                }
            }
        }
        Ok(report)
    }

    fn aggregate(&self, entity_id: EntityId, events: &[RawActivity], now: DateTime<Utc>) -> ActivityRecord {
        let first = &events[0];
        let mut record = ActivityRecord::new(entity_id, first.path.clone())
            .with_volume(first.volume.clone());
        record.is_directory = events.iter().any(|e| e.is_directory);

        let first_seen = events.iter().map(|e| e.timestamp).min().unwrap_or(now);
        let last_seen = events.iter().map(|e| e.timestamp).max().unwrap_or(now);
        let last_write = events
            .iter()
            .filter(|e| e.activity.is_write())
            .map(|e| e.timestamp)
            .max()
            .unwrap_or(first_seen);

        record.first_seen = first_seen;
        record.last_modified = last_write;
        record.last_accessed = last_seen;
        for event in events {
            record.activity_summary.record(event.activity, 1);
            for (key, value) in &event.attributes {
                record.attributes.insert(key.clone(), value.clone());
            }
        }
        // Renames carry the new path
        if let Some(renamed) = events.iter().filter(|e| e.activity == ActivityType::Rename).last() {
            record.path = renamed.path.clone();
        }
        record.activity_summary.span_days =
            (last_seen - first_seen).num_seconds() as f64 / 86_400.0;

        record.importance_score = self.scorer.score(&record);
        let concepts = self.extractor.extract(&record, now);
        record.with_concepts(concepts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryTierStore;
    use crate::types::{Tier, W5hDimension};
    use chrono::Duration;

    fn recorder(store: Arc<MemoryTierStore>) -> SensoryRecorder {
        SensoryRecorder::new(store, ImportanceScorer::default())
    }

    #[tokio::test]
    async fn events_are_aggregated_per_entity() {
        let store = MemoryTierStore::new();
        let t0 = Utc::now() - Duration::days(3);
        let path = "/home/ana/Documents/plan.docx";
        let events = vec![
            RawActivity::new(path, ActivityType::Create, t0),
            RawActivity::new(path, ActivityType::Modify, t0 + Duration::days(1)),
            RawActivity::new(path, ActivityType::Read, t0 + Duration::days(2)),
            RawActivity::new("/tmp/x.log", ActivityType::Read, t0).with_entity_id("tmp-x"),
        ];

        let report = recorder(store.clone()).record(events).await.unwrap();
        assert_eq!(report.received, 4);
        assert_eq!(report.entities, 2);
        assert_eq!(report.inserted, 2);

        let id = RawActivity::new(path, ActivityType::Read, t0).resolved_id();
        let record = store.get(Tier::Sensory, &id).await.unwrap().unwrap();
        assert_eq!(record.activity_summary.total(), 3);
        assert_eq!(record.first_seen, t0);
        assert_eq!(record.last_modified, t0 + Duration::days(1));
        assert_eq!(record.last_accessed, t0 + Duration::days(2));
        assert!((record.activity_summary.span_days - 2.0).abs() < 1e-9);
        assert!(record.importance_score > 0.85);
        assert!(record.w5h_concepts.contains(W5hDimension::What, "document"));
        assert!(record.semantic_concepts.contains("documents_folder"));
    }

    #[tokio::test]
    async fn repeated_batches_are_duplicates() {
        let store = MemoryTierStore::new();
        let event = RawActivity::new("/data/a.txt", ActivityType::Modify, Utc::now())
            .with_entity_id("a");
        let recorder = recorder(store.clone());

        recorder.record(vec![event.clone()]).await.unwrap();
        let report = recorder.record(vec![event]).await.unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(report.duplicates, 1);
    }

    #[tokio::test]
    async fn empty_paths_are_rejected() {
        let store = MemoryTierStore::new();
        let report = recorder(store)
            .record(vec![RawActivity::new(" ", ActivityType::Read, Utc::now())])
            .await
            .unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.entities, 0);
    }

    #[test]
    fn raw_activity_parses_from_json() {
        let raw: RawActivity = serde_json::from_str(
            r#"{"path": "C:\\Users\\Bo\\a.txt", "activity": "security_change", "timestamp": "2026-01-02T03:04:05Z"}"#,
        )
        .unwrap();
        assert_eq!(raw.activity, ActivityType::SecurityChange);
        assert_eq!(raw.resolved_id(), "c:/users/bo/a.txt");
    }

    #[test]
    fn derived_ids_prefix_the_volume_when_known() {
        let mut raw = RawActivity::new("/Data/A.txt", ActivityType::Read, Utc::now());
        assert_eq!(raw.resolved_id(), "/data/a.txt");

        raw.volume = "Disk0".into();
        assert_eq!(raw.resolved_id(), "disk0:/data/a.txt");

        raw.entity_id = Some("Given-ID".into());
        assert_eq!(raw.resolved_id(), "Given-ID");
    }
}
