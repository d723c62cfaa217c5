//! W5H concept extraction
//!
//! Tags come from a fixed vocabulary. Inputs the vocabulary does not cover
//! simply produce fewer tags.

use crate::types::{ActivityRecord, ActivityType, W5hConcepts, W5hDimension};
use chrono::{DateTime, Utc};

/// Bumped whenever a tag is added, removed or renamed
pub const VOCABULARY_VERSION: u32 = 1;

const HOME_ROOTS: &[&str] = &["home", "users"];
const SYSTEM_ROOTS: &[&str] = &[
    "etc", "usr", "var", "opt", "bin", "sbin", "lib", "windows", "program files",
    "program files (x86)", "programdata", "system32", "library",
];
const SHARED_SEGMENTS: &[&str] = &["shared", "public", "share"];

const EXT_DOCUMENT: &[&str] = &["doc", "docx", "pdf", "odt", "rtf", "pages"];
const EXT_TEXT: &[&str] = &["txt", "md", "rst", "tex", "org", "log"];
const EXT_SPREADSHEET: &[&str] = &["xls", "xlsx", "ods", "csv", "numbers"];
const EXT_PRESENTATION: &[&str] = &["ppt", "pptx", "odp", "key"];
const EXT_SOURCE: &[&str] = &[
    "rs", "py", "js", "ts", "tsx", "jsx", "c", "h", "cc", "cpp", "hpp", "cs", "java", "kt", "go",
    "rb", "php", "swift", "scala", "sql", "ipynb",
];
const EXT_SCRIPT: &[&str] = &["sh", "bash", "zsh", "ps1", "bat", "cmd"];
const EXT_CONFIG: &[&str] = &["toml", "yaml", "yml", "json", "ini", "cfg", "conf", "env", "xml"];
const EXT_IMAGE: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "svg", "heic", "webp", "tiff", "raw"];
const EXT_VIDEO: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "m4v"];
const EXT_AUDIO: &[&str] = &["mp3", "wav", "flac", "aac", "ogg", "m4a"];
const EXT_ARCHIVE: &[&str] = &["zip", "tar", "gz", "tgz", "7z", "rar", "bz2", "xz"];

const WHERE_RULES: &[(&[&str], &str)] = &[
    (&["documents", "my documents"], "documents_folder"),
    (&["desktop"], "desktop"),
    (&["downloads"], "downloads_folder"),
    (&["pictures", "photos", "music", "videos", "movies"], "media_folder"),
    (&["work", "office", "clients"], "work_directory"),
    (&["src", "source", "repos", "code", "projects", "git"], "source_directory"),
    (&["onedrive", "dropbox", "google drive", "icloud drive", "icloud"], "cloud_storage"),
    (&["tmp", "temp", "cache", ".cache", "caches"], "temp_location"),
];

const WHY_RULES: &[(&[&str], &str)] = &[
    (&["work", "office", "clients", "meetings"], "work_related"),
    (&["personal", "pictures", "photos", "music", "videos", "movies", "family"], "personal_use"),
    (&["courses", "learning", "tutorials", "school", "study", "university"], "learning"),
    (&["backup", "backups", "archive", "archives"], "archival_backup"),
];

const PROJECT_ROOTS: &[&str] = &["projects", "project", "repos"];

/// Derives W5H concept tags from a record's path, extension, timestamps and
/// activity counters
#[derive(Debug, Clone, Copy, Default)]
pub struct ConceptExtractor;

impl ConceptExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn vocabulary_version(&self) -> u32 {
        VOCABULARY_VERSION
    }

    /// Extract concepts relative to the reference time `now`
    pub fn extract(&self, record: &ActivityRecord, now: DateTime<Utc>) -> W5hConcepts {
        let segments = record.path_segments();
        let dirs: &[String] = if record.is_directory {
            &segments
        } else {
            &segments[..segments.len().saturating_sub(1)]
        };

        let mut concepts = W5hConcepts::new();
        extract_who(dirs, &mut concepts);
        extract_what(record, &mut concepts);
        extract_when(record, now, &mut concepts);
        extract_where(dirs, &mut concepts);
        extract_why(dirs, &mut concepts);
        extract_how(record, now, &mut concepts);
        concepts
    }
}

fn extract_who(dirs: &[String], concepts: &mut W5hConcepts) {
    if let Some(pos) = dirs.iter().position(|s| HOME_ROOTS.contains(&s.as_str())) {
        if let Some(name) = dirs.get(pos + 1) {
            if SHARED_SEGMENTS.contains(&name.as_str()) {
                concepts.insert(W5hDimension::Who, "shared");
            } else {
                concepts.insert(W5hDimension::Who, format!("user:{name}"));
            }
        }
    } else if dirs
        .first()
        .is_some_and(|root| SYSTEM_ROOTS.contains(&root.as_str()))
    {
        concepts.insert(W5hDimension::Who, "system");
    }

    if dirs.iter().any(|s| SHARED_SEGMENTS.contains(&s.as_str())) {
        concepts.insert(W5hDimension::Who, "shared");
    }
}

fn extract_what(record: &ActivityRecord, concepts: &mut W5hConcepts) {
    if record.is_directory {
        concepts.insert(W5hDimension::What, "folder");
        return;
    }
    let Some(ext) = record.extension() else {
        return;
    };
    let ext = ext.as_str();

    let table: &[(&[&str], &[&str])] = &[
        (EXT_DOCUMENT, &["document"]),
        (EXT_TEXT, &["document", "text"]),
        (EXT_SPREADSHEET, &["document", "spreadsheet"]),
        (EXT_PRESENTATION, &["document", "presentation"]),
        (EXT_SOURCE, &["source_code"]),
        (EXT_SCRIPT, &["source_code", "script"]),
        (EXT_CONFIG, &["config"]),
        (EXT_IMAGE, &["image"]),
        (EXT_VIDEO, &["video"]),
        (EXT_AUDIO, &["audio"]),
        (EXT_ARCHIVE, &["archive"]),
    ];
    for (extensions, tags) in table {
        if extensions.contains(&ext) {
            for tag in *tags {
                concepts.insert(W5hDimension::What, *tag);
            }
        }
    }
}

fn extract_when(record: &ActivityRecord, now: DateTime<Utc>, concepts: &mut W5hConcepts) {
    let idle_days = (now - record.last_activity()).num_days();
    let bucket = match idle_days {
        d if d <= 7 => "recent_week_activity",
        d if d <= 30 => "recent_month_activity",
        d if d <= 90 => "recent_quarter_activity",
        _ => "older_activity",
    };
    concepts.insert(W5hDimension::When, bucket);

    let lived_days = (record.last_activity() - record.first_seen).num_days() as f64;
    if lived_days.max(record.activity_summary.span_days) >= 180.0 {
        concepts.insert(W5hDimension::When, "long_lived");
    }
}

fn extract_where(dirs: &[String], concepts: &mut W5hConcepts) {
    for (segments, tag) in WHERE_RULES {
        if dirs.iter().any(|s| segments.contains(&s.as_str())) {
            concepts.insert(W5hDimension::Where, *tag);
        }
    }
}

fn extract_why(dirs: &[String], concepts: &mut W5hConcepts) {
    for (i, segment) in dirs.iter().enumerate() {
        if PROJECT_ROOTS.contains(&segment.as_str()) {
            concepts.insert(W5hDimension::Why, "project_work");
            if let Some(name) = dirs.get(i + 1) {
                concepts.insert(W5hDimension::Why, format!("project:{name}"));
            }
        }
    }
    for (segments, tag) in WHY_RULES {
        if dirs.iter().any(|s| segments.contains(&s.as_str())) {
            concepts.insert(W5hDimension::Why, *tag);
        }
    }
}

fn extract_how(record: &ActivityRecord, now: DateTime<Utc>, concepts: &mut W5hConcepts) {
    let summary = &record.activity_summary;
    let modifies = summary.count(ActivityType::Modify);
    let reads = summary.count(ActivityType::Read);

    if modifies >= 5 {
        concepts.insert(W5hDimension::How, "frequently_modified");
    }
    if modifies > 0 && (now - record.last_modified).num_days() <= 3 {
        concepts.insert(W5hDimension::How, "work_in_progress");
    }
    if summary.count(ActivityType::Create) > 0 && (now - record.first_seen).num_days() <= 7 {
        concepts.insert(W5hDimension::How, "recently_created");
    }
    if reads > 0 && reads >= 3 * summary.writes() {
        concepts.insert(W5hDimension::How, "read_mostly");
    }
    if summary.total() <= 1 && (now - record.last_activity()).num_days() > 90 {
        concepts.insert(W5hDimension::How, "rarely_accessed");
    }
    if summary.count(ActivityType::Rename) > 0 {
        concepts.insert(W5hDimension::How, "renamed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tags(concepts: &W5hConcepts, dim: W5hDimension) -> Vec<&str> {
        concepts.get(dim).iter().map(String::as_str).collect()
    }

    #[test]
    fn project_source_file() {
        let now = Utc::now();
        let record = ActivityRecord::new("e1", "/home/ana/projects/strata/src/lib.rs")
            .with_first_seen(now - Duration::days(2))
            .with_activity(ActivityType::Create, 1)
            .with_activity(ActivityType::Modify, 6);

        let concepts = ConceptExtractor::new().extract(&record, now);

        assert_eq!(tags(&concepts, W5hDimension::Who), vec!["user:ana"]);
        assert_eq!(tags(&concepts, W5hDimension::What), vec!["source_code"]);
        assert_eq!(tags(&concepts, W5hDimension::When), vec!["recent_week_activity"]);
        assert_eq!(tags(&concepts, W5hDimension::Where), vec!["source_directory"]);
        assert_eq!(
            tags(&concepts, W5hDimension::Why),
            vec!["project:strata", "project_work"]
        );
        assert!(concepts.contains(W5hDimension::How, "frequently_modified"));
        assert!(concepts.contains(W5hDimension::How, "recently_created"));
    }

    #[test]
    fn windows_document_in_work_folder() {
        let now = Utc::now();
        let record = ActivityRecord::new("e2", r"C:\Users\Bo\Documents\Work\budget.xlsx")
            .with_first_seen(now - Duration::days(400))
            .with_last_modified(now - Duration::days(20))
            .with_last_accessed(now - Duration::days(20))
            .with_activity(ActivityType::Read, 9)
            .with_activity(ActivityType::Modify, 1);

        let concepts = ConceptExtractor::new().extract(&record, now);

        assert_eq!(tags(&concepts, W5hDimension::Who), vec!["user:bo"]);
        assert_eq!(
            tags(&concepts, W5hDimension::What),
            vec!["document", "spreadsheet"]
        );
        assert_eq!(
            tags(&concepts, W5hDimension::When),
            vec!["long_lived", "recent_month_activity"]
        );
        assert_eq!(
            tags(&concepts, W5hDimension::Where),
            vec!["documents_folder", "work_directory"]
        );
        assert_eq!(tags(&concepts, W5hDimension::Why), vec!["work_related"]);
        assert_eq!(tags(&concepts, W5hDimension::How), vec!["read_mostly"]);
    }

    #[test]
    fn unknown_inputs_produce_fewer_tags() {
        let now = Utc::now();
        let record = ActivityRecord::new("e3", "blob.qqq");
        let concepts = ConceptExtractor::new().extract(&record, now);

        assert!(concepts.get(W5hDimension::Who).is_empty());
        assert!(concepts.get(W5hDimension::What).is_empty());
        assert!(concepts.get(W5hDimension::Where).is_empty());
        // Time buckets always apply
        assert_eq!(tags(&concepts, W5hDimension::When), vec!["recent_week_activity"]);
    }

    #[test]
    fn stale_untouched_download() {
        let now = Utc::now();
        let old = now - Duration::days(200);
        let record = ActivityRecord::new("e4", "/Users/cy/Downloads/installer.zip")
            .with_first_seen(old)
            .with_last_modified(old)
            .with_last_accessed(old)
            .with_activity(ActivityType::Create, 1);

        let concepts = ConceptExtractor::new().extract(&record, now);
        assert_eq!(tags(&concepts, W5hDimension::What), vec!["archive"]);
        assert_eq!(tags(&concepts, W5hDimension::When), vec!["older_activity"]);
        assert_eq!(tags(&concepts, W5hDimension::Where), vec!["downloads_folder"]);
        assert_eq!(tags(&concepts, W5hDimension::How), vec!["rarely_accessed"]);
    }

    #[test]
    fn directories_and_system_paths() {
        let now = Utc::now();
        let dir = ActivityRecord::new("d", "/etc/nginx").as_directory();
        let concepts = ConceptExtractor::new().extract(&dir, now);
        assert_eq!(tags(&concepts, W5hDimension::What), vec!["folder"]);
        assert_eq!(tags(&concepts, W5hDimension::Who), vec!["system"]);
    }

    #[test]
    fn extraction_is_replayable() {
        let now = Utc::now();
        let record = ActivityRecord::new("e5", "/home/ana/Pictures/trip/beach.jpg")
            .with_activity(ActivityType::Rename, 1);
        let extractor = ConceptExtractor::new();
        assert_eq!(extractor.extract(&record, now), extractor.extract(&record, now));
        assert!(extractor
            .extract(&record, now)
            .contains(W5hDimension::How, "renamed"));
    }
}
