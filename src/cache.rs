//! # Ontology cache - bounded in-memory memoization
//!
//! Ontology expansion is deterministic, so results are cached by the
//! canonical encoding of the input concepts. Entries are stored bincode
//! encoded and evicted oldest-first once `max_entries` is reached.

use crate::error::{Result, StrataError};
use crate::ontology::OntologyEnhancer;
use crate::types::{Ontology, W5hConcepts};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::warn;

/// Unique cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    pub fn ontology(concepts: &W5hConcepts) -> Self {
        Self(format!("ontology:v1:{}", concepts.canonical_key()))
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_requests as f64
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    /// Bypass the cache entirely
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            enabled: true,
        }
    }
}

#[derive(Default)]
struct Entries {
    data: HashMap<CacheKey, Vec<u8>>,
    order: VecDeque<CacheKey>,
}

/// Memoizing front for the ontology enhancer
pub struct OntologyCache {
    enhancer: OntologyEnhancer,
    entries: RwLock<Entries>,
    config: CacheConfig,
    stats: RwLock<CacheStats>,
}

impl std::fmt::Debug for OntologyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OntologyCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OntologyCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            enhancer: OntologyEnhancer::new(),
            entries: RwLock::new(Entries::default()),
            config,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Cached ontology for `concepts`, computing and storing it on a miss
    pub async fn enhance(&self, concepts: &W5hConcepts) -> Ontology {
        if !self.config.enabled || self.config.max_entries == 0 {
            return self.enhancer.enhance(concepts);
        }

        let key = CacheKey::ontology(concepts);
        if let Some(ontology) = self.get(&key).await {
            return ontology;
        }

        let ontology = self.enhancer.enhance(concepts);
        if let Err(e) = self.put(key, &ontology).await {
            warn!(error = %e, "Failed to cache ontology");
        }
        ontology
    }

    async fn get(&self, key: &CacheKey) -> Option<Ontology> {
        let decoded = {
            let entries = self.entries.read().await;
            entries
                .data
                .get(key)
                .and_then(|data| bincode::deserialize::<Ontology>(data).ok())
        };

        let mut stats = self.stats.write().await;
        stats.total_requests += 1;
        if decoded.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        decoded
    }

    async fn put(&self, key: CacheKey, value: &Ontology) -> Result<()> {
        let data =
            bincode::serialize(value).map_err(|e| StrataError::Serialization(e.to_string()))?;

        let mut entries = self.entries.write().await;
        if entries.data.contains_key(&key) {
            entries.data.insert(key, data);
            return Ok(());
        }

        let mut evicted = 0;
        while entries.data.len() >= self.config.max_entries {
            match entries.order.pop_front() {
                Some(oldest) => {
                    entries.data.remove(&oldest);
                    evicted += 1;
                }
                None => break,
            }
        }
        entries.order.push_back(key.clone());
        entries.data.insert(key, data);
        drop(entries);

        if evicted > 0 {
            self.stats.write().await.evictions += evicted;
        }
        Ok(())
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.data.clear();
        entries.order.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await.data.len();
        let mut stats = self.stats.read().await.clone();
        stats.entries = entries;
        stats
    }
}

impl Default for OntologyCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Configuration builder
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_entries(mut self, count: usize) -> Self {
        self.config.max_entries = count;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn build(self) -> CacheConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::W5hDimension;

    fn concepts(tag: &str) -> W5hConcepts {
        W5hConcepts::new()
            .with(W5hDimension::What, &[tag])
            .with(W5hDimension::Why, &["work_related"])
    }

    #[tokio::test]
    async fn second_lookup_hits() {
        let cache = OntologyCache::default();
        let first = cache.enhance(&concepts("document")).await;
        let second = cache.enhance(&concepts("document")).await;
        assert_eq!(first, second);

        let stats = cache.stats().await;
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[tokio::test]
    async fn oldest_entry_is_evicted() {
        let cache = OntologyCache::new(CacheConfigBuilder::new().max_entries(2).build());
        cache.enhance(&concepts("document")).await;
        cache.enhance(&concepts("image")).await;
        cache.enhance(&concepts("video")).await;

        let stats = cache.stats().await;
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 2);

        // "document" was dropped, so this is a miss
        cache.enhance(&concepts("document")).await;
        assert_eq!(cache.stats().await.misses, 4);
    }

    #[tokio::test]
    async fn disabled_cache_still_enhances() {
        let cache = OntologyCache::new(CacheConfigBuilder::new().enabled(false).build());
        let ontology = cache.enhance(&concepts("document")).await;
        assert!(ontology.inferences.contains("work_document"));
        assert_eq!(cache.stats().await, CacheStats::default());
    }

    #[tokio::test]
    async fn clear_empties_entries() {
        let cache = OntologyCache::default();
        cache.enhance(&concepts("document")).await;
        cache.clear().await;
        assert_eq!(cache.stats().await.entries, 0);
    }
}
