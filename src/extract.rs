//! Metadata extractor.
//!
//! Derives a [`NoteMetadata`] record for a single note from its content and,
//! when available, the previously stored record. Notes may start with a YAML
//! frontmatter block fenced by `---` lines; everything the extractor needs
//! from the on-disk format is the frontmatter keys, the first heading, and
//! the outgoing links.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::library::Library;
use crate::models::{LinkRelations, NoteMetadata, ParaSets};

static WIKILINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\]\[|#]+)(?:[|#][^\]]*)?\]\]").unwrap());
static MD_LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\]\(([^)\s]+)\)").unwrap());
static HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#\s+(.+)$").unwrap());

/// Frontmatter keys the pipeline understands. Unknown keys are ignored,
/// and a malformed block is treated as no frontmatter at all.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Frontmatter {
    title: Option<String>,
    collection: Option<String>,
    tags: Vec<String>,
    boards: Vec<String>,
    status: Option<String>,
    priority: Option<i64>,
    target_date: Option<NaiveDate>,
    parents: Vec<String>,
    projects: Vec<String>,
    areas: Vec<String>,
    resources: Vec<String>,
    archive: Vec<String>,
}

/// Extract the metadata record for `path`.
///
/// `existing` is the previously stored record, if any; its `created_at` and
/// reverse link fields are preserved so that re-extraction does not lose
/// state only the pipeline knows about.
pub fn extract_metadata(
    library: &Library,
    path: &str,
    existing: Option<&NoteMetadata>,
) -> Result<NoteMetadata> {
    let content = library.read(path)?;
    let size = library.size_of(path).unwrap_or(content.len() as u64);
    let modified = timestamp(library.modified_secs(path));

    let (front, body) = split_frontmatter(&content);
    let front: Frontmatter = match front {
        Some(block) => serde_yaml::from_str(block).unwrap_or_else(|e| {
            debug!(path, error = %e, "ignoring malformed frontmatter");
            Frontmatter::default()
        }),
        None => Frontmatter::default(),
    };

    let name = file_stem(path);
    let title = front
        .title
        .clone()
        .or_else(|| first_heading(body))
        .unwrap_or_else(|| name.clone());

    let folders = folder_components(path);
    let collection = front.collection.clone().or_else(|| folders.first().cloned());

    let mut links = LinkRelations {
        ancestor: ancestor_chain(path),
        parents: dedup(front.parents),
        used_links: outgoing_links(body),
        ..Default::default()
    };
    if let Some(prev) = existing {
        links.kids = prev.links.kids.clone();
        links.links_to_here = prev.links.links_to_here.clone();
    }

    Ok(NoteMetadata {
        name,
        title,
        created_at: existing.and_then(|r| r.created_at).or(modified),
        last_edited: modified,
        target_date: front.target_date,
        collection,
        folders,
        tags: dedup(front.tags),
        boards: dedup(front.boards),
        links,
        file_type: file_extension(path),
        para: ParaSets {
            projects: dedup(front.projects),
            areas: dedup(front.areas),
            resources: dedup(front.resources),
            archive: dedup(front.archive),
        },
        status: front.status,
        priority: front.priority,
        size,
    })
}

/// Split a note into its frontmatter block and body.
fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content.strip_prefix("---\n") else {
        return (None, content);
    };
    match rest.find("\n---") {
        Some(end) => {
            let body = rest[end + 4..].trim_start_matches('\n');
            (Some(&rest[..end]), body)
        }
        None => (None, content),
    }
}

fn first_heading(body: &str) -> Option<String> {
    HEADING_RE
        .captures(body)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Outgoing links: `[[wikilinks]]` plus relative markdown links, normalized
/// to `.md` paths. External URLs and anchors are skipped.
fn outgoing_links(body: &str) -> Vec<String> {
    let mut targets = Vec::new();

    for cap in WIKILINK_RE.captures_iter(body) {
        let target = cap[1].trim();
        if target.is_empty() {
            continue;
        }
        let mut path = target.to_string();
        if !path.contains('.') {
            path.push_str(".md");
        }
        targets.push(path);
    }

    for cap in MD_LINK_RE.captures_iter(body) {
        let target = cap[1].trim();
        if target.contains("://") || target.starts_with('#') || !target.ends_with(".md") {
            continue;
        }
        targets.push(target.trim_start_matches("./").to_string());
    }

    dedup(targets)
}

fn folder_components(path: &str) -> Vec<String> {
    let mut parts: Vec<String> = path.split('/').map(str::to_string).collect();
    parts.pop();
    parts
}

/// Folder prefix chain: `a/b/c.md` → `["a", "a/b"]`.
fn ancestor_chain(path: &str) -> Vec<String> {
    let folders = folder_components(path);
    let mut chain = Vec::with_capacity(folders.len());
    let mut prefix = String::new();
    for folder in &folders {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(folder);
        chain.push(prefix.clone());
    }
    chain
}

fn file_stem(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

fn file_extension(path: &str) -> String {
    std::path::Path::new(path)
        .extension()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        None
    } else {
        Utc.timestamp_opt(secs, 0).single()
    }
}

/// Deduplicate while preserving first-seen order.
fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibraryConfig;
    use tempfile::TempDir;

    fn library_with(files: &[(&str, &str)]) -> (TempDir, Library) {
        let tmp = TempDir::new().unwrap();
        for (path, content) in files {
            let full = tmp.path().join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(full, content).unwrap();
        }
        let lib = Library::new(&LibraryConfig {
            root: tmp.path().to_path_buf(),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec![],
        })
        .unwrap();
        (tmp, lib)
    }

    #[test]
    fn extracts_frontmatter_fields() {
        let (_tmp, lib) = library_with(&[(
            "work/plan.md",
            "---\ntitle: Quarterly Plan\ncollection: planning\ntags: [work, q3]\nstatus: active\npriority: 2\ntarget_date: 2026-09-15\nparents: [work/index.md]\nprojects: [work/launch.md]\n---\n# Ignored Heading\nbody\n",
        )]);

        let record = extract_metadata(&lib, "work/plan.md", None).unwrap();
        assert_eq!(record.title, "Quarterly Plan");
        assert_eq!(record.name, "plan");
        assert_eq!(record.collection.as_deref(), Some("planning"));
        assert_eq!(record.tags, vec!["work", "q3"]);
        assert_eq!(record.status.as_deref(), Some("active"));
        assert_eq!(record.priority, Some(2));
        assert_eq!(
            record.target_date,
            Some(NaiveDate::from_ymd_opt(2026, 9, 15).unwrap())
        );
        assert_eq!(record.links.parents, vec!["work/index.md"]);
        assert_eq!(record.para.projects, vec!["work/launch.md"]);
        assert_eq!(record.file_type, "md");
        assert_eq!(record.folders, vec!["work"]);
    }

    #[test]
    fn title_falls_back_to_heading_then_name() {
        let (_tmp, lib) = library_with(&[
            ("heading.md", "# From Heading\ntext"),
            ("bare.md", "no heading here"),
        ]);

        assert_eq!(
            extract_metadata(&lib, "heading.md", None).unwrap().title,
            "From Heading"
        );
        assert_eq!(extract_metadata(&lib, "bare.md", None).unwrap().title, "bare");
    }

    #[test]
    fn collects_outgoing_links() {
        let (_tmp, lib) = library_with(&[(
            "a.md",
            "See [[work/plan]] and [[work/plan|alias]] and [other](./work/other.md), not [ext](https://example.com/x.md).",
        )]);

        let record = extract_metadata(&lib, "a.md", None).unwrap();
        assert_eq!(record.links.used_links, vec!["work/plan.md", "work/other.md"]);
    }

    #[test]
    fn ancestor_chain_and_folders() {
        let (_tmp, lib) = library_with(&[("a/b/c.md", "x")]);
        let record = extract_metadata(&lib, "a/b/c.md", None).unwrap();
        assert_eq!(record.folders, vec!["a", "b"]);
        assert_eq!(record.links.ancestor, vec!["a", "a/b"]);
        // Collection defaults to the first folder when frontmatter is silent.
        assert_eq!(record.collection.as_deref(), Some("a"));
    }

    #[test]
    fn preserves_created_at_and_reverse_links() {
        let (_tmp, lib) = library_with(&[("a.md", "x")]);
        let created = Utc.timestamp_opt(1_600_000_000, 0).single();
        let existing = NoteMetadata {
            created_at: created,
            links: LinkRelations {
                kids: vec!["k.md".to_string()],
                links_to_here: vec!["b.md".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };

        let record = extract_metadata(&lib, "a.md", Some(&existing)).unwrap();
        assert_eq!(record.created_at, created);
        assert_eq!(record.links.kids, vec!["k.md"]);
        assert_eq!(record.links.links_to_here, vec!["b.md"]);
    }

    #[test]
    fn malformed_frontmatter_is_ignored() {
        let (_tmp, lib) = library_with(&[("a.md", "---\ntags: [unclosed\n---\n# Still Works\n")]);
        let record = extract_metadata(&lib, "a.md", None).unwrap();
        assert!(record.tags.is_empty());
        assert_eq!(record.title, "Still Works");
    }
}
