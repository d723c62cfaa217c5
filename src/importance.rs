//! Importance scoring for activity records
//!
//! The score is a pure function of the record: the most significant activity
//! observed, the kind of file, where it lives, and whether it is a directory.

use crate::types::{ActivityRecord, ActivityType};
use serde::{Deserialize, Serialize};

/// Lowest score the scorer ever returns
pub const MIN_SCORE: f64 = 0.1;
/// Highest score the scorer ever returns
pub const MAX_SCORE: f64 = 1.0;

const DOCUMENT_EXTENSIONS: &[&str] = &[
    "doc", "docx", "pdf", "odt", "rtf", "txt", "md", "rst", "tex", "xls", "xlsx", "ods", "csv",
    "ppt", "pptx", "odp", "key", "pages", "numbers",
];

const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "tsx", "jsx", "c", "h", "cc", "cpp", "hpp", "cs", "java", "kt", "go",
    "rb", "php", "swift", "scala", "sql", "sh", "ps1", "bat", "toml", "yaml", "yml", "json", "ipynb",
];

const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "svg", "heic", "webp", "tiff", "raw", "mp4", "mov", "avi",
    "mkv", "webm", "mp3", "wav", "flac", "aac", "ogg", "m4a",
];

const IMPORTANT_SEGMENTS: &[&str] = &[
    "documents", "my documents", "projects", "project", "src", "source", "repos", "code",
    "workspace", "work", "desktop",
];

const TRANSIENT_SEGMENTS: &[&str] = &[
    "tmp", "temp", "cache", ".cache", "caches", "downloads", "appdata", "node_modules", "target",
    "__pycache__", "$recycle.bin", ".trash",
];

/// Weights for each scoring factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportanceWeights {
    /// Starting score before any factor is applied
    pub base: f64,
    pub create_or_security: f64,
    pub delete_or_rename: f64,
    pub modify: f64,
    pub read: f64,
    /// Documents, code and text
    pub primary_file_type: f64,
    pub media_file_type: f64,
    pub important_location: f64,
    /// Subtracted for temp, cache and download locations
    pub transient_location: f64,
    pub directory: f64,
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            base: 0.30,
            create_or_security: 0.20,
            delete_or_rename: 0.15,
            modify: 0.10,
            read: 0.05,
            primary_file_type: 0.20,
            media_file_type: 0.10,
            important_location: 0.20,
            transient_location: 0.20,
            directory: 0.05,
        }
    }
}

/// Deterministic importance scorer
#[derive(Debug, Clone, Default)]
pub struct ImportanceScorer {
    weights: ImportanceWeights,
}

impl ImportanceScorer {
    pub fn new(weights: ImportanceWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ImportanceWeights {
        &self.weights
    }

    /// Score a record into [0.1, 1.0]
    pub fn score(&self, record: &ActivityRecord) -> f64 {
        let w = &self.weights;
        let score = w.base
            + self.activity_weight(record)
            + self.file_type_weight(record)
            + self.location_weight(record)
            + if record.is_directory { w.directory } else { 0.0 };

        if score.is_nan() {
            return MIN_SCORE;
        }
        score.clamp(MIN_SCORE, MAX_SCORE)
    }

    /// Weight of the most significant activity observed
    fn activity_weight(&self, record: &ActivityRecord) -> f64 {
        let w = &self.weights;
        record
            .activity_summary
            .observed()
            .map(|activity| match activity {
                ActivityType::Create | ActivityType::SecurityChange => w.create_or_security,
                ActivityType::Delete | ActivityType::Rename => w.delete_or_rename,
                ActivityType::Modify => w.modify,
                ActivityType::Read => w.read,
            })
            .fold(0.0, f64::max)
    }

    fn file_type_weight(&self, record: &ActivityRecord) -> f64 {
        if record.is_directory {
            return 0.0;
        }
        match record.extension() {
            Some(ext) if is_primary_extension(&ext) => self.weights.primary_file_type,
            Some(ext) if MEDIA_EXTENSIONS.contains(&ext.as_str()) => self.weights.media_file_type,
            _ => 0.0,
        }
    }

    fn location_weight(&self, record: &ActivityRecord) -> f64 {
        let segments = record.path_segments();
        // The file name itself is not a location
        let dirs = &segments[..segments.len().saturating_sub(if record.is_directory { 0 } else { 1 })];

        let mut weight = 0.0;
        if dirs.iter().any(|s| IMPORTANT_SEGMENTS.contains(&s.as_str())) {
            weight += self.weights.important_location;
        }
        if dirs.iter().any(|s| TRANSIENT_SEGMENTS.contains(&s.as_str())) {
            weight -= self.weights.transient_location;
        }
        weight
    }
}

/// Documents, source code and plain text
pub fn is_primary_extension(ext: &str) -> bool {
    DOCUMENT_EXTENSIONS.contains(&ext) || CODE_EXTENSIONS.contains(&ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> ImportanceScorer {
        ImportanceScorer::default()
    }

    #[test]
    fn created_project_document_scores_high() {
        let record = ActivityRecord::new("e1", "/home/ana/Projects/strata/design.md")
            .with_activity(ActivityType::Create, 1)
            .with_activity(ActivityType::Read, 4);

        let score = scorer().score(&record);
        assert!((score - 0.9).abs() < 1e-9, "score was {score}");
    }

    #[test]
    fn activity_weights_are_ordered() {
        let path = "/data/file.bin";
        let score_for = |activity| {
            scorer().score(&ActivityRecord::new("e", path).with_activity(activity, 1))
        };

        let create = score_for(ActivityType::Create);
        let security = score_for(ActivityType::SecurityChange);
        let rename = score_for(ActivityType::Rename);
        let delete = score_for(ActivityType::Delete);
        let read = score_for(ActivityType::Read);

        assert_eq!(create, security);
        assert_eq!(rename, delete);
        assert!(create > rename);
        assert!(rename > read);
    }

    #[test]
    fn transient_locations_are_penalised() {
        let kept = ActivityRecord::new("a", "/home/ana/Documents/report.pdf");
        let downloaded = ActivityRecord::new("b", "/home/ana/Downloads/report.pdf");
        assert!(scorer().score(&kept) > scorer().score(&downloaded));
    }

    #[test]
    fn score_never_reaches_zero() {
        let weights = ImportanceWeights {
            base: -5.0,
            ..ImportanceWeights::default()
        };
        let record = ActivityRecord::new("e", "/tmp/cache/x");
        assert_eq!(ImportanceScorer::new(weights).score(&record), MIN_SCORE);
    }

    #[test]
    fn score_is_bounded_for_assorted_inputs() {
        let paths = [
            "/",
            "",
            "C:\\Users\\bo\\AppData\\Local\\Temp\\x.tmp",
            "/home/bo/src/work/projects/Documents/a.rs",
            "relative/name",
            "/home/bo/music/track.flac",
        ];
        let s = scorer();
        for path in paths {
            for activity in ActivityType::ALL {
                for dir in [false, true] {
                    let mut record = ActivityRecord::new("e", path).with_activity(*activity, 3);
                    record.is_directory = dir;
                    let score = s.score(&record);
                    assert!(score > 0.0 && score <= 1.0, "{path}: {score}");
                }
            }
        }
    }

    #[test]
    fn directories_get_a_small_bonus() {
        let file = ActivityRecord::new("a", "/data/things");
        let dir = ActivityRecord::new("b", "/data/things").as_directory();
        assert!(scorer().score(&dir) > scorer().score(&file));
    }
}
