//! Core data models for the synchronization and indexing pipeline.
//!
//! These types represent the note metadata records, change sets, and batch
//! results that flow between the change detector, the extractor, the storage
//! backends, and the search engines.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Link relations of a note within the library.
///
/// Forward fields (`ancestor`, `parents`, `used_links`) are derived from the
/// note itself; reverse fields (`kids`, `links_to_here`) are maintained by
/// the metadata job's reverse-link pass. All fields hold relative paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkRelations {
    #[serde(default)]
    pub ancestor: Vec<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub kids: Vec<String>,
    #[serde(default)]
    pub used_links: Vec<String>,
    #[serde(default)]
    pub links_to_here: Vec<String>,
}

/// PARA classification of a note: path lists declared in frontmatter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParaSets {
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub areas: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub archive: Vec<String>,
}

/// Structured metadata record for a single note, keyed by its relative path.
///
/// Exactly one record exists per live path; an absent record means the path
/// has not been indexed yet, which is distinct from an empty record. Empty
/// list fields serialize as `[]` and deserialize from an absent field, so
/// records round-trip losslessly through both storage backends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteMetadata {
    pub name: String,
    pub title: String,
    pub created_at: Option<DateTime<Utc>>,
    pub last_edited: Option<DateTime<Utc>>,
    #[serde(default)]
    pub target_date: Option<NaiveDate>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub boards: Vec<String>,
    #[serde(default)]
    pub links: LinkRelations,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub para: ParaSets,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub size: u64,
}

/// A file reference returned from a search query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteRef {
    pub path: String,
    pub name: String,
}

impl NoteRef {
    /// Build a reference from a relative path, deriving the display name
    /// from the file stem.
    pub fn from_path(path: &str) -> Self {
        let name = std::path::Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string());
        Self {
            path: path.to_string(),
            name,
        }
    }
}

/// Disjoint sets of changed and deleted paths produced by one detection
/// cycle, plus the revision the cycle observed.
///
/// `revision` is the candidate for the new marker; the orchestrator advances
/// the stored marker to it only after the whole batch has been processed.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub changed: Vec<String>,
    pub deleted: Vec<String>,
    pub revision: Option<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// Outcome of processing one path within a metadata cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Applied,
    Skipped { reason: String },
}

/// Per-item results of one metadata cycle.
///
/// Transient per-item failures are recorded here instead of only being
/// logged, so callers and tests can assert on partial-failure behavior.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub purged: Vec<(String, ItemOutcome)>,
    pub upserted: Vec<(String, ItemOutcome)>,
}

impl BatchReport {
    pub fn record_purge(&mut self, path: &str, outcome: ItemOutcome) {
        self.purged.push((path.to_string(), outcome));
    }

    pub fn record_upsert(&mut self, path: &str, outcome: ItemOutcome) {
        self.upserted.push((path.to_string(), outcome));
    }

    /// Count of successfully applied operations (purges and upserts).
    pub fn applied(&self) -> usize {
        self.purged
            .iter()
            .chain(self.upserted.iter())
            .filter(|(_, o)| *o == ItemOutcome::Applied)
            .count()
    }

    /// Count of skipped items.
    pub fn skipped(&self) -> usize {
        self.purged
            .iter()
            .chain(self.upserted.iter())
            .filter(|(_, o)| matches!(o, ItemOutcome::Skipped { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_arrays_round_trip_as_empty() {
        let record = NoteMetadata {
            name: "note".to_string(),
            title: "Note".to_string(),
            ..Default::default()
        };

        let bytes = serde_json::to_vec(&record).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(
            text.contains("\"tags\":[]"),
            "empty tags must serialize: {text}"
        );

        let back: NoteMetadata = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, record);
        assert!(back.tags.is_empty());
    }

    #[test]
    fn absent_list_fields_deserialize_to_empty() {
        let back: NoteMetadata = serde_json::from_str(
            r#"{"name":"n","title":"t","created_at":null,"last_edited":null}"#,
        )
        .unwrap();
        assert!(back.folders.is_empty());
        assert!(back.links.used_links.is_empty());
        assert!(back.para.projects.is_empty());
    }

    #[test]
    fn note_ref_name_from_stem() {
        let r = NoteRef::from_path("projects/plans/roadmap.md");
        assert_eq!(r.name, "roadmap");
        assert_eq!(r.path, "projects/plans/roadmap.md");
    }

    #[test]
    fn batch_report_counts() {
        let mut report = BatchReport::default();
        report.record_upsert("a.md", ItemOutcome::Applied);
        report.record_upsert(
            "b.md",
            ItemOutcome::Skipped {
                reason: "unreadable".to_string(),
            },
        );
        report.record_purge("c.md", ItemOutcome::Applied);
        assert_eq!(report.applied(), 2);
        assert_eq!(report.skipped(), 1);
    }
}
