//! Change detection.
//!
//! Reconciles three sources of truth — the working tree, the version-control
//! history, and the persisted revision marker — into disjoint sets of
//! changed and deleted paths for one cycle. A collaborator failure in any
//! step degrades that step to an empty contribution; the remaining steps
//! still run.

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::error;

use crate::library::Library;
use crate::models::ChangeSet;
use crate::storage::KeyValueStore;
use crate::vcs::VersionControl;

/// Config-domain key holding the last fully reconciled revision.
pub const REVISION_MARKER_KEY: &str = "sync/last-revision";

pub struct ChangeDetector {
    vcs: Arc<dyn VersionControl>,
    config_store: Arc<dyn KeyValueStore>,
    library: Arc<Library>,
}

impl ChangeDetector {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        config_store: Arc<dyn KeyValueStore>,
        library: Arc<Library>,
    ) -> Self {
        Self {
            vcs,
            config_store,
            library,
        }
    }

    /// The stored revision marker, if any cycle has ever completed.
    pub async fn last_marker(&self) -> Result<Option<String>> {
        match self.config_store.get(REVISION_MARKER_KEY).await? {
            None => Ok(None),
            Some(bytes) => {
                let marker: String = serde_json::from_slice(&bytes)?;
                if marker.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(marker))
                }
            }
        }
    }

    /// Advance the marker. Called by the orchestrator only after the whole
    /// changed/deleted batch of the cycle has been processed.
    pub async fn advance_marker(&self, revision: &str) -> Result<()> {
        self.config_store
            .set(REVISION_MARKER_KEY, &serde_json::to_vec(revision)?)
            .await
    }

    /// Run one detection cycle.
    pub async fn detect(&self) -> Result<ChangeSet> {
        let mut changed: Vec<String> = Vec::new();
        let mut deleted: Vec<String> = Vec::new();

        // 1. Working-tree modifications: commit, then mark as changed.
        match self.vcs.modified_files() {
            Ok(paths) => {
                if !paths.is_empty() {
                    if let Err(e) = self.vcs.commit_changes(&paths) {
                        error!(error = %e, "failed to commit modified files");
                    }
                    changed.extend(paths);
                }
            }
            Err(e) => error!(error = %e, "modified-files detection failed"),
        }

        // 2. Uncommitted deletions: mark deleted, commit the removals.
        match self.vcs.uncommitted_deletions() {
            Ok(paths) => {
                if !paths.is_empty() {
                    if let Err(e) = self.vcs.commit_changes(&paths) {
                        error!(error = %e, "failed to commit deletions");
                    }
                    deleted.extend(paths);
                }
            }
            Err(e) => error!(error = %e, "deletion detection failed"),
        }

        // 3. Untracked new files: add to version control, mark as changed.
        match self.vcs.untracked_files() {
            Ok(paths) => {
                if !paths.is_empty() {
                    if let Err(e) = self.vcs.commit_changes(&paths) {
                        error!(error = %e, "failed to add untracked files");
                    }
                    changed.extend(paths);
                }
            }
            Err(e) => error!(error = %e, "untracked-files detection failed"),
        }

        // 4. History between the marker and the current revision. Skipped
        //    entirely on the first run (no marker stored yet).
        let marker = self.last_marker().await?;
        let revision = match self.vcs.current_revision() {
            Ok(current) => {
                if let Some(marker) = marker.filter(|m| *m != current) {
                    match self.vcs.files_changed_between(&marker, &current) {
                        Ok(paths) => changed.extend(paths),
                        Err(e) => error!(error = %e, "history diff failed"),
                    }
                    match self.vcs.files_deleted_between(&marker, &current) {
                        Ok(paths) => deleted.extend(paths),
                        Err(e) => error!(error = %e, "history deletion diff failed"),
                    }
                }
                Some(current)
            }
            Err(e) => {
                error!(error = %e, "current revision unavailable");
                None
            }
        };

        // Only note files enter the pipeline.
        changed.retain(|p| self.library.is_tracked(p));
        deleted.retain(|p| self.library.is_tracked(p));

        // 5. Deduplicate each set independently.
        changed = dedup(changed);
        deleted = dedup(deleted);

        // 6. Deletion takes precedence over change within one cycle.
        let deleted_set: HashSet<&String> = deleted.iter().collect();
        changed.retain(|p| !deleted_set.contains(p));

        Ok(ChangeSet {
            changed,
            deleted,
            revision,
        })
    }
}

fn dedup(paths: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    paths.into_iter().filter(|p| seen.insert(p.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibraryConfig;
    use crate::storage::json::JsonStore;
    use anyhow::bail;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scriptable collaborator double.
    #[derive(Default)]
    struct FakeVcs {
        modified: Vec<String>,
        untracked: Vec<String>,
        deletions: Vec<String>,
        revision: Option<String>,
        history_changed: Vec<String>,
        history_deleted: Vec<String>,
        fail_modified: bool,
        commits: Mutex<Vec<Vec<String>>>,
        history_calls: Mutex<Vec<(String, String)>>,
    }

    impl VersionControl for FakeVcs {
        fn modified_files(&self) -> Result<Vec<String>> {
            if self.fail_modified {
                bail!("not a repository");
            }
            Ok(self.modified.clone())
        }

        fn untracked_files(&self) -> Result<Vec<String>> {
            Ok(self.untracked.clone())
        }

        fn uncommitted_deletions(&self) -> Result<Vec<String>> {
            Ok(self.deletions.clone())
        }

        fn commit_changes(&self, paths: &[String]) -> Result<()> {
            self.commits.lock().unwrap().push(paths.to_vec());
            Ok(())
        }

        fn current_revision(&self) -> Result<String> {
            match &self.revision {
                Some(r) => Ok(r.clone()),
                None => bail!("no commits yet"),
            }
        }

        fn files_changed_between(&self, from: &str, to: &str) -> Result<Vec<String>> {
            self.history_calls
                .lock()
                .unwrap()
                .push((from.to_string(), to.to_string()));
            Ok(self.history_changed.clone())
        }

        fn files_deleted_between(&self, _from: &str, _to: &str) -> Result<Vec<String>> {
            Ok(self.history_deleted.clone())
        }
    }

    async fn detector_with(vcs: FakeVcs) -> (TempDir, ChangeDetector, Arc<FakeVcs>) {
        let tmp = TempDir::new().unwrap();
        let library = Arc::new(
            Library::new(&LibraryConfig {
                root: tmp.path().to_path_buf(),
                include_globs: vec!["**/*.md".to_string()],
                exclude_globs: vec![],
            })
            .unwrap(),
        );
        let store: Arc<dyn KeyValueStore> =
            Arc::new(JsonStore::open(&tmp.path().join("store/config")).unwrap());
        let vcs = Arc::new(vcs);
        let detector = ChangeDetector::new(vcs.clone(), store, library);
        (tmp, detector, vcs)
    }

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn dedup_and_disjointness() {
        let (_tmp, detector, _vcs) = detector_with(FakeVcs {
            modified: paths(&["a.md", "b.md", "a.md"]),
            untracked: paths(&["b.md", "c.md"]),
            deletions: paths(&["c.md", "c.md", "d.md"]),
            revision: Some("r2".to_string()),
            ..Default::default()
        })
        .await;

        let set = detector.detect().await.unwrap();

        // Each path at most once per set.
        assert_eq!(set.changed, paths(&["a.md", "b.md"]));
        assert_eq!(set.deleted, paths(&["c.md", "d.md"]));
        // No path in both sets: deletion wins.
        for p in &set.changed {
            assert!(!set.deleted.contains(p));
        }
    }

    #[tokio::test]
    async fn first_run_skips_history_diff() {
        let (_tmp, detector, vcs) = detector_with(FakeVcs {
            untracked: paths(&["a.md"]),
            revision: Some("r1".to_string()),
            history_changed: paths(&["should-not-appear.md"]),
            ..Default::default()
        })
        .await;

        let set = detector.detect().await.unwrap();
        assert_eq!(set.changed, paths(&["a.md"]));
        assert!(vcs.history_calls.lock().unwrap().is_empty());
        assert_eq!(set.revision.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn history_diff_runs_between_marker_and_head() {
        let (_tmp, detector, vcs) = detector_with(FakeVcs {
            revision: Some("r2".to_string()),
            history_changed: paths(&["pulled.md"]),
            history_deleted: paths(&["gone.md"]),
            ..Default::default()
        })
        .await;

        detector.advance_marker("r1").await.unwrap();
        let set = detector.detect().await.unwrap();

        assert_eq!(set.changed, paths(&["pulled.md"]));
        assert_eq!(set.deleted, paths(&["gone.md"]));
        assert_eq!(
            vcs.history_calls.lock().unwrap().as_slice(),
            &[("r1".to_string(), "r2".to_string())]
        );
    }

    #[tokio::test]
    async fn unchanged_revision_skips_history_diff() {
        let (_tmp, detector, vcs) = detector_with(FakeVcs {
            revision: Some("r1".to_string()),
            history_changed: paths(&["should-not-appear.md"]),
            ..Default::default()
        })
        .await;

        detector.advance_marker("r1").await.unwrap();
        let set = detector.detect().await.unwrap();
        assert!(set.is_empty());
        assert!(vcs.history_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn collaborator_failure_degrades_to_empty_step() {
        let (_tmp, detector, _vcs) = detector_with(FakeVcs {
            fail_modified: true,
            untracked: paths(&["new.md"]),
            revision: Some("r1".to_string()),
            ..Default::default()
        })
        .await;

        // The failing step contributes nothing; the others still run.
        let set = detector.detect().await.unwrap();
        assert_eq!(set.changed, paths(&["new.md"]));
    }

    #[tokio::test]
    async fn detection_commits_working_tree_changes() {
        let (_tmp, detector, vcs) = detector_with(FakeVcs {
            modified: paths(&["a.md"]),
            deletions: paths(&["b.md"]),
            untracked: paths(&["c.md"]),
            revision: Some("r1".to_string()),
            ..Default::default()
        })
        .await;

        detector.detect().await.unwrap();
        let commits = vcs.commits.lock().unwrap();
        assert_eq!(commits.len(), 3);
        assert_eq!(commits[0], paths(&["a.md"]));
        assert_eq!(commits[1], paths(&["b.md"]));
        assert_eq!(commits[2], paths(&["c.md"]));
    }

    #[tokio::test]
    async fn non_note_paths_are_filtered() {
        let (_tmp, detector, _vcs) = detector_with(FakeVcs {
            modified: paths(&["a.md", "assets/logo.png", ".notekeep/settings.toml"]),
            revision: Some("r1".to_string()),
            ..Default::default()
        })
        .await;

        let set = detector.detect().await.unwrap();
        assert_eq!(set.changed, paths(&["a.md"]));
    }

    #[tokio::test]
    async fn marker_round_trip() {
        let (_tmp, detector, _vcs) = detector_with(FakeVcs::default()).await;

        assert_eq!(detector.last_marker().await.unwrap(), None);
        detector.advance_marker("abc123").await.unwrap();
        assert_eq!(
            detector.last_marker().await.unwrap().as_deref(),
            Some("abc123")
        );
    }
}
