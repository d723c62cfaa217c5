//! Tier storage using SQLite

use crate::error::{Result, StrataError};
use crate::storage_backend::{RecordPatch, SortKey, TierFilter, TierStore};
use crate::types::{ActivityRecord, GraphMetadata, KnowledgeGraphEdge, Tier};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::error::DatabaseError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const RECORD_COLUMNS: &str = "document, consolidated_to_next, graph_metadata";

/// SQLite-backed tier store
#[derive(Clone)]
pub struct SqliteTierStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteTierStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTierStore")
            .field("pool", &"<SqlitePool>")
            .finish()
    }
}

impl SqliteTierStore {
    /// Wrap an already migrated pool
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self { pool })
    }

    /// Open (or create) a database file and run migrations
    pub async fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePool::connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self::new(pool))
    }

    /// Private in-memory database, mostly useful for tests
    pub async fn in_memory() -> Result<Arc<Self>> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self::new(pool))
    }

    /// Get a reference to the SQLite pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_records(
        &self,
        tier: Tier,
        filter: &TierFilter,
        sort: SortKey,
        limit: Option<usize>,
    ) -> Result<Vec<ActivityRecord>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {RECORD_COLUMNS} FROM activity_records WHERE "
        ));
        push_filter(&mut qb, tier, filter);
        qb.push(" ORDER BY ").push(sort_clause(sort));
        if let Some(limit) = limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }
}

#[async_trait]
impl TierStore for SqliteTierStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn query(
        &self,
        tier: Tier,
        filter: &TierFilter,
        sort: SortKey,
        limit: Option<usize>,
    ) -> Result<Vec<ActivityRecord>> {
        self.fetch_records(tier, filter, sort, limit).await
    }

    async fn insert(&self, record: &ActivityRecord) -> Result<()> {
        let document = serde_json::to_string(record)?;
        let graph_json = record.graph.as_ref().map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO activity_records (
                tier, entity_id, path, path_folded, volume, is_directory, first_seen,
                last_modified, last_accessed, importance_score, consolidated_to_next,
                graph_metadata, document
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.tier.as_str())
        .bind(&record.entity_id)
        .bind(&record.path)
        .bind(record.path.to_lowercase())
        .bind(&record.volume)
        .bind(record.is_directory)
        .bind(record.first_seen.timestamp_micros())
        .bind(record.last_modified.timestamp_micros())
        .bind(record.last_accessed.timestamp_micros())
        .bind(record.importance_score)
        .bind(record.consolidated_to_next)
        .bind(graph_json)
        .bind(document)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StrataError::AlreadyExists {
                    tier: record.tier,
                    entity_id: record.entity_id.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, tier: Tier, entity_id: &str, patch: &RecordPatch) -> Result<()> {
        let graph_json = patch.graph.as_ref().map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE activity_records
            SET consolidated_to_next = COALESCE(?, consolidated_to_next),
                graph_metadata = COALESCE(?, graph_metadata)
            WHERE tier = ? AND entity_id = ?
            "#,
        )
        .bind(patch.consolidated_to_next)
        .bind(graph_json)
        .bind(tier.as_str())
        .bind(entity_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StrataError::NotFound(format!("{tier}/{entity_id}")));
        }
        Ok(())
    }

    async fn exists(&self, tier: Tier, entity_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM activity_records WHERE tier = ? AND entity_id = ?")
            .bind(tier.as_str())
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    async fn get(&self, tier: Tier, entity_id: &str) -> Result<Option<ActivityRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM activity_records WHERE tier = ? AND entity_id = ?"
        ))
        .bind(tier.as_str())
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn count(&self, tier: Tier, filter: &TierFilter) -> Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM activity_records WHERE ");
        push_filter(&mut qb, tier, filter);
        let count: i64 = qb.build().fetch_one(&self.pool).await?.try_get(0)?;

        Ok(count.max(0) as u64)
    }

    async fn mean_importance(&self, tier: Tier, filter: &TierFilter) -> Result<Option<f64>> {
        let mut qb =
            QueryBuilder::<Sqlite>::new("SELECT AVG(importance_score) FROM activity_records WHERE ");
        push_filter(&mut qb, tier, filter);
        let mean: Option<f64> = qb.build().fetch_one(&self.pool).await?.try_get(0)?;

        Ok(mean)
    }

    async fn insert_edge(&self, edge: &KnowledgeGraphEdge) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO knowledge_graph_edges (
                from_entity, to_entity, edge_type, semantic_type, strength, created_at,
                common_concepts, description
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(from_entity, to_entity, edge_type) DO NOTHING
            "#,
        )
        .bind(&edge.from_entity)
        .bind(&edge.to_entity)
        .bind(edge.edge_type.as_str())
        .bind(&edge.semantic_type)
        .bind(edge.strength)
        .bind(edge.created_at)
        .bind(edge.common_concepts as i64)
        .bind(&edge.description)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn edges_for(
        &self,
        entity_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<KnowledgeGraphEdge>> {
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let rows = sqlx::query(
            r#"
            SELECT from_entity, to_entity, edge_type, semantic_type, strength, created_at,
                   common_concepts, description
            FROM knowledge_graph_edges
            WHERE from_entity = ? OR to_entity = ?
            ORDER BY strength DESC, from_entity, to_entity
            LIMIT ?
            "#,
        )
        .bind(entity_id)
        .bind(entity_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_edge).collect()
    }

    async fn count_edges(&self) -> Result<u64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM knowledge_graph_edges")
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;

        Ok(count.max(0) as u64)
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, tier: Tier, filter: &TierFilter) {
    qb.push("tier = ").push_bind(tier.as_str().to_string());

    if let Some(min) = filter.min_importance {
        qb.push(" AND importance_score >= ").push_bind(min);
    }
    if let Some(max) = filter.importance_below {
        qb.push(" AND importance_score < ").push_bind(max);
    }
    if let Some(cutoff) = filter.first_seen_before {
        qb.push(" AND first_seen <= ").push_bind(cutoff.timestamp_micros());
    }
    if let Some(flag) = filter.consolidated {
        qb.push(" AND consolidated_to_next = ").push_bind(flag);
    }
    // Folded in Rust on both sides: SQLite's own case folding is ASCII-only
    if let Some(needle) = &filter.path_contains {
        qb.push(" AND path_folded LIKE ")
            .push_bind(format!("%{}%", escape_like(&needle.to_lowercase())))
            .push(" ESCAPE '\\'");
    }
    for tag in &filter.required_concepts {
        push_tag_exists(qb, "$.semantic_concepts".to_string(), tag);
    }
    if let Some(required) = &filter.required_w5h {
        for (dim, tags) in required.iter() {
            for tag in tags {
                push_tag_exists(qb, format!("$.w5h_concepts.{dim}"), tag);
            }
        }
    }
}

/// Require `tag` in the JSON array at `json_path` of the document
fn push_tag_exists(qb: &mut QueryBuilder<'_, Sqlite>, json_path: String, tag: &str) {
    qb.push(" AND EXISTS (SELECT 1 FROM json_each(document, ")
        .push_bind(json_path)
        .push(") WHERE value = ")
        .push_bind(tag.to_string())
        .push(")");
}

fn sort_clause(sort: SortKey) -> &'static str {
    match sort {
        SortKey::ImportanceDesc => "importance_score DESC, entity_id ASC",
        SortKey::FirstSeenAsc => "first_seen ASC, entity_id ASC",
        SortKey::LastModifiedDesc => "last_modified DESC, entity_id ASC",
    }
}

fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Helper: Convert database row to ActivityRecord
fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ActivityRecord> {
    let document: String = row.try_get("document")?;
    let mut record: ActivityRecord = serde_json::from_str(&document)?;

    // Mutable fields are kept outside the document
    record.consolidated_to_next = row.try_get("consolidated_to_next")?;
    let graph_json: Option<String> = row.try_get("graph_metadata")?;
    record.graph = graph_json
        .map(|json| serde_json::from_str::<GraphMetadata>(&json))
        .transpose()?;

    Ok(record)
}

/// Helper: Convert database row to KnowledgeGraphEdge
fn row_to_edge(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeGraphEdge> {
    let edge_type: String = row.try_get("edge_type")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let common_concepts: i64 = row.try_get("common_concepts")?;

    Ok(KnowledgeGraphEdge {
        from_entity: row.try_get("from_entity")?,
        to_entity: row.try_get("to_entity")?,
        edge_type: edge_type.parse()?,
        semantic_type: row.try_get("semantic_type")?,
        strength: row.try_get("strength")?,
        created_at,
        common_concepts: common_concepts.max(0) as u64,
        description: row.try_get("description")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EdgeType, W5hConcepts, W5hDimension};
    use chrono::Duration;

    async fn open_temp() -> (tempfile::TempDir, Arc<SqliteTierStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTierStore::open(dir.path().join("strata.db")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn record_survives_a_round_trip() {
        let (_dir, store) = open_temp().await;
        let record = ActivityRecord::new("e1", "/home/ana/Documents/plan.docx")
            .with_volume("disk0")
            .with_importance(0.7)
            .with_concepts(W5hConcepts::new().with(W5hDimension::What, &["document"]))
            .with_attribute("usn", serde_json::json!(4411));

        store.insert(&record).await.unwrap();
        let loaded = store.get(Tier::Sensory, "e1").await.unwrap().unwrap();
        assert_eq!(loaded, record);

        let err = store.insert(&record).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn eligibility_query_filters_in_sql() {
        let (_dir, store) = open_temp().await;
        let now = Utc::now();
        let rows = [
            ("old-high", 100, 0.9),
            ("old-low", 100, 0.2),
            ("new-high", 1, 0.95),
        ];
        for (id, days, importance) in rows {
            let record = ActivityRecord::new(id, format!("/data/{id}.txt"))
                .with_first_seen(now - Duration::days(days))
                .with_importance(importance);
            store.insert(&record).await.unwrap();
        }

        let filter = TierFilter::new()
            .min_importance(0.5)
            .first_seen_before(now - Duration::days(30))
            .consolidated(false);
        let found = store
            .query(Tier::Sensory, &filter, SortKey::ImportanceDesc, Some(10))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity_id, "old-high");

        let below = TierFilter::new()
            .importance_below(0.5)
            .first_seen_before(now - Duration::days(30));
        assert_eq!(store.count(Tier::Sensory, &below).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_sets_flag_and_graph_columns() {
        let (_dir, store) = open_temp().await;
        store
            .insert(&ActivityRecord::new("e1", "/a").with_tier(Tier::Sensory))
            .await
            .unwrap();

        store
            .update(Tier::Sensory, "e1", &RecordPatch::mark_consolidated())
            .await
            .unwrap();
        let meta = GraphMetadata {
            relationship_count: 2,
            centrality: 0.1,
            relationship_types: [EdgeType::ProjectRelated].into(),
        };
        store
            .update(Tier::Sensory, "e1", &RecordPatch::graph(meta.clone()))
            .await
            .unwrap();

        let loaded = store.get(Tier::Sensory, "e1").await.unwrap().unwrap();
        assert!(loaded.consolidated_to_next);
        assert_eq!(loaded.graph, Some(meta));

        let pending = TierFilter::new().consolidated(false);
        assert_eq!(store.count(Tier::Sensory, &pending).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn path_filter_escapes_wildcards() {
        let store = SqliteTierStore::in_memory().await.unwrap();
        store.insert(&ActivityRecord::new("a", "/data/100%_done.txt")).await.unwrap();
        store.insert(&ActivityRecord::new("b", "/data/100x_done.txt")).await.unwrap();

        let hits = store
            .query(
                Tier::Sensory,
                &TierFilter::new().path_contains("100%"),
                SortKey::ImportanceDesc,
                None,
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id, "a");
    }

    #[tokio::test]
    async fn edges_insert_idempotently() {
        let store = SqliteTierStore::in_memory().await.unwrap();
        let edge = KnowledgeGraphEdge::new("a", "b", EdgeType::SemanticallyRelated, 0.4)
            .with_common_concepts(4)
            .with_description("shares 4 concepts");

        assert!(store.insert_edge(&edge).await.unwrap());
        assert!(!store.insert_edge(&edge).await.unwrap());

        assert_eq!(store.count_edges().await.unwrap(), 1);
        let edges = store.edges_for("b", Some(5)).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].common_concepts, 4);
        assert_eq!(edges[0].strength, 0.4);
    }

    #[tokio::test]
    async fn concept_filters_run_in_sql_with_limit() {
        let store = SqliteTierStore::in_memory().await.unwrap();
        let docs = [
            ("a", 0.9, &["document", "text"][..]),
            ("b", 0.8, &["image"][..]),
            ("c", 0.7, &["document"][..]),
            ("d", 0.6, &["document", "text"][..]),
        ];
        for (id, importance, what) in docs {
            store
                .insert(
                    &ActivityRecord::new(id, format!("/data/{id}"))
                        .with_importance(importance)
                        .with_concepts(W5hConcepts::new().with(W5hDimension::What, what)),
                )
                .await
                .unwrap();
        }

        let by_tags = TierFilter::new().require_concepts(["document".to_string()].into());
        let top = store
            .query(Tier::Sensory, &by_tags, SortKey::ImportanceDesc, Some(2))
            .await
            .unwrap();
        let ids: Vec<&str> = top.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(store.count(Tier::Sensory, &by_tags).await.unwrap(), 3);

        let by_w5h = TierFilter::new()
            .require_w5h(W5hConcepts::new().with(W5hDimension::What, &["document", "text"]));
        assert_eq!(store.count(Tier::Sensory, &by_w5h).await.unwrap(), 2);
        let wrong_dimension = TierFilter::new()
            .require_w5h(W5hConcepts::new().with(W5hDimension::Where, &["document"]));
        assert_eq!(store.count(Tier::Sensory, &wrong_dimension).await.unwrap(), 0);

        let mean = store.mean_importance(Tier::Sensory, &by_tags).await.unwrap().unwrap();
        assert!((mean - (0.9 + 0.7 + 0.6) / 3.0).abs() < 1e-9);
        assert_eq!(store.mean_importance(Tier::Archival, &TierFilter::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn path_search_folds_non_ascii_case() {
        let store = SqliteTierStore::in_memory().await.unwrap();
        store.insert(&ActivityRecord::new("e1", "/home/zoë/ÉTUDES/Plan.md")).await.unwrap();

        for needle in ["études", "ÉTUDES", "ZOË/é"] {
            let filter = TierFilter::new().path_contains(needle);
            assert_eq!(store.count(Tier::Sensory, &filter).await.unwrap(), 1, "{needle}");

            let record = store.get(Tier::Sensory, "e1").await.unwrap().unwrap();
            assert!(filter.matches(&record), "{needle}");
        }
    }
}
