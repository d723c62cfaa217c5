//! Engine and stage configuration

use crate::cache::CacheConfig;
use crate::error::{Result, StrataError};
use crate::importance::ImportanceWeights;
use crate::orchestrator::StageOverrides;
use crate::types::Tier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Upper bound on `min_age_days` (one hundred years)
pub const MAX_MIN_AGE_DAYS: f64 = 36_500.0;

/// Parameters for one consolidation stage invocation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageParams {
    /// Minimum age since first seen, in days
    pub min_age_days: f64,
    /// Minimum importance score (inclusive)
    pub min_importance: f64,
    /// Maximum candidates considered per invocation
    pub batch_limit: usize,
    /// Classify candidates without writing anything
    pub dry_run: bool,
}

impl Default for StageParams {
    fn default() -> Self {
        Self::for_source(Tier::Sensory)
    }
}

impl StageParams {
    /// Default parameters for the stage promoting out of `source`
    pub fn for_source(source: Tier) -> Self {
        let (min_age_days, min_importance, batch_limit) = match source {
            Tier::Sensory => (0.5, 0.3, 1000),
            Tier::ShortTerm => (7.0, 0.5, 500),
            Tier::LongTerm | Tier::Archival => (90.0, 0.8, 100),
        };
        Self {
            min_age_days,
            min_importance,
            batch_limit,
            dry_run: false,
        }
    }

    pub fn min_age_days(mut self, days: f64) -> Self {
        self.min_age_days = days;
        self
    }

    pub fn min_importance(mut self, importance: f64) -> Self {
        self.min_importance = importance;
        self
    }

    pub fn batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.min_importance.is_finite() || !(0.0..=1.0).contains(&self.min_importance) {
            return Err(StrataError::Configuration(format!(
                "min_importance must be within [0, 1], got {}",
                self.min_importance
            )));
        }
        if !self.min_age_days.is_finite() || !(0.0..=MAX_MIN_AGE_DAYS).contains(&self.min_age_days) {
            return Err(StrataError::Configuration(format!(
                "min_age_days must be within [0, {MAX_MIN_AGE_DAYS}], got {}",
                self.min_age_days
            )));
        }
        if self.batch_limit == 0 {
            return Err(StrataError::Configuration(
                "batch_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Minimum age as a duration, rounded down to whole seconds
    pub fn min_age(&self) -> Result<chrono::Duration> {
        chrono::Duration::try_seconds((self.min_age_days * 86_400.0) as i64).ok_or_else(|| {
            StrataError::Configuration(format!("min_age_days {} is out of range", self.min_age_days))
        })
    }

    /// Records first seen at or before this instant are old enough
    pub fn cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let age = self.min_age()?;
        now.checked_sub_signed(age).ok_or_else(|| {
            StrataError::Configuration(format!(
                "min_age_days {} reaches before the earliest representable time",
                self.min_age_days
            ))
        })
    }
}

/// A stage object in a config file only overrides the fields it names;
/// the rest come from that stage's own defaults
fn stage_over_defaults<'de, D>(deserializer: D, source: Tier) -> std::result::Result<StageParams, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = StageOverrides::deserialize(deserializer)?;
    Ok(overrides.apply(StageParams::for_source(source)))
}

fn sensory_stage<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<StageParams, D::Error> {
    stage_over_defaults(deserializer, Tier::Sensory)
}

fn short_term_stage<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<StageParams, D::Error> {
    stage_over_defaults(deserializer, Tier::ShortTerm)
}

fn long_term_stage<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<StageParams, D::Error> {
    stage_over_defaults(deserializer, Tier::LongTerm)
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(deserialize_with = "sensory_stage")]
    pub sensory_to_short_term: StageParams,
    #[serde(deserialize_with = "short_term_stage")]
    pub short_term_to_long_term: StageParams,
    #[serde(deserialize_with = "long_term_stage")]
    pub long_term_to_archival: StageParams,
    /// Candidates processed concurrently within a stage
    pub concurrency: usize,
    /// Archival records scanned for graph siblings
    pub sibling_scan_limit: usize,
    /// Edges built per new archival entity, per edge type
    pub edge_limit: usize,
    /// Neighbours attached to each search hit
    pub graph_neighbor_limit: usize,
    /// Seconds between scheduled runs
    pub schedule_interval_secs: u64,
    pub importance: ImportanceWeights,
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sensory_to_short_term: StageParams::for_source(Tier::Sensory),
            short_term_to_long_term: StageParams::for_source(Tier::ShortTerm),
            long_term_to_archival: StageParams::for_source(Tier::LongTerm),
            concurrency: 4,
            sibling_scan_limit: 500,
            edge_limit: 10,
            graph_neighbor_limit: 5,
            schedule_interval_secs: 3600,
            importance: ImportanceWeights::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load a JSON config file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            StrataError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Default parameters for the stage promoting out of `source`
    pub fn stage_params(&self, source: Tier) -> StageParams {
        match source {
            Tier::Sensory => self.sensory_to_short_term,
            Tier::ShortTerm => self.short_term_to_long_term,
            Tier::LongTerm | Tier::Archival => self.long_term_to_archival,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.sensory_to_short_term.validate()?;
        self.short_term_to_long_term.validate()?;
        self.long_term_to_archival.validate()?;
        if self.concurrency == 0 {
            return Err(StrataError::Configuration(
                "concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for engine config
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, source: Tier, params: StageParams) -> Self {
        match source {
            Tier::Sensory => self.config.sensory_to_short_term = params,
            Tier::ShortTerm => self.config.short_term_to_long_term = params,
            Tier::LongTerm | Tier::Archival => self.config.long_term_to_archival = params,
        }
        self
    }

    pub fn concurrency(mut self, workers: usize) -> Self {
        self.config.concurrency = workers;
        self
    }

    pub fn sibling_scan_limit(mut self, limit: usize) -> Self {
        self.config.sibling_scan_limit = limit;
        self
    }

    pub fn edge_limit(mut self, limit: usize) -> Self {
        self.config.edge_limit = limit;
        self
    }

    pub fn graph_neighbor_limit(mut self, limit: usize) -> Self {
        self.config.graph_neighbor_limit = limit;
        self
    }

    pub fn schedule_interval_secs(mut self, secs: u64) -> Self {
        self.config.schedule_interval_secs = secs;
        self
    }

    pub fn importance(mut self, weights: ImportanceWeights) -> Self {
        self.config.importance = weights;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_per_stage() {
        let config = EngineConfig::default();
        assert_eq!(config.stage_params(Tier::Sensory).batch_limit, 1000);
        assert_eq!(config.stage_params(Tier::ShortTerm).min_age_days, 7.0);
        assert_eq!(config.stage_params(Tier::LongTerm).min_importance, 0.8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_params() {
        let base = StageParams::default();
        assert!(base.min_importance(1.2).validate().is_err());
        assert!(base.min_importance(f64::NAN).validate().is_err());
        assert!(base.min_age_days(-1.0).validate().is_err());
        assert!(base.batch_limit(0).validate().is_err());
        assert!(base.min_importance(0.0).min_age_days(0.0).validate().is_ok());
    }

    #[test]
    fn min_age_is_capped() {
        let base = StageParams::for_source(Tier::LongTerm);
        assert!(base.min_age_days(MAX_MIN_AGE_DAYS).validate().is_ok());
        assert!(base.min_age_days(MAX_MIN_AGE_DAYS + 1.0).validate().is_err());
        assert!(base.min_age_days(1e9).validate().is_err());

        // Unvalidated params still fail cleanly instead of overflowing
        assert!(matches!(
            base.min_age_days(1e9).cutoff(Utc::now()),
            Err(StrataError::Configuration(_))
        ));
        assert!(base.min_age_days(MAX_MIN_AGE_DAYS).cutoff(Utc::now()).is_ok());
    }

    #[test]
    fn min_age_handles_fractional_days() {
        let params = StageParams::default().min_age_days(0.5);
        assert_eq!(params.min_age().unwrap(), chrono::Duration::hours(12));
    }

    #[test]
    fn load_fills_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"concurrency": 8, "long_term_to_archival": {{"min_importance": 0.9}}}}"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.long_term_to_archival.min_importance, 0.9);
        // Unset fields of a partial stage keep that stage's own defaults
        assert_eq!(config.long_term_to_archival.min_age_days, 90.0);
        assert_eq!(config.long_term_to_archival.batch_limit, 100);
        assert_eq!(config.short_term_to_long_term, StageParams::for_source(Tier::ShortTerm));
        assert_eq!(config.sibling_scan_limit, 500);
    }

    #[test]
    fn load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"concurrency": 0}}"#).unwrap();
        assert!(matches!(
            EngineConfig::load(file.path()),
            Err(StrataError::Configuration(_))
        ));
        assert!(EngineConfig::load("/definitely/not/here.json").is_err());
    }

    #[test]
    fn builder_overrides_stage() {
        let config = EngineConfigBuilder::new()
            .stage(Tier::LongTerm, StageParams::for_source(Tier::LongTerm).dry_run(true))
            .concurrency(2)
            .build();
        assert!(config.long_term_to_archival.dry_run);
        assert_eq!(config.concurrency, 2);
    }
}
