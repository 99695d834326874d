//! Version-control collaborator.
//!
//! The pipeline consumes version control through the narrow [`VersionControl`]
//! trait; [`GitRepo`] is the production implementation, shelling out to the
//! `git` binary. Test doubles implement the trait directly.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Narrow contract over the version-controlled note library.
///
/// All paths are relative to the repository root. Implementations must be
/// `Send + Sync`; the orchestrator calls them from async tasks.
pub trait VersionControl: Send + Sync {
    /// Tracked files with uncommitted content modifications.
    fn modified_files(&self) -> Result<Vec<String>>;

    /// Files present in the working tree but unknown to version control.
    fn untracked_files(&self) -> Result<Vec<String>>;

    /// Tracked files deleted from the working tree without a commit.
    fn uncommitted_deletions(&self) -> Result<Vec<String>>;

    /// Stage and commit the given paths (including deletions).
    fn commit_changes(&self, paths: &[String]) -> Result<()>;

    /// Identifier of the current head revision.
    fn current_revision(&self) -> Result<String>;

    /// Files changed (added or modified, not deleted) between two revisions.
    fn files_changed_between(&self, from: &str, to: &str) -> Result<Vec<String>>;

    /// Files deleted between two revisions.
    fn files_deleted_between(&self, from: &str, to: &str) -> Result<Vec<String>>;
}

/// Git implementation of [`VersionControl`] over a local repository.
pub struct GitRepo {
    workdir: PathBuf,
}

impl GitRepo {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", args[0]))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", args[0], stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Parse `git status --porcelain` into (status code, path) pairs.
    fn status_entries(&self) -> Result<Vec<(String, String)>> {
        let stdout = self.git(&["status", "--porcelain"])?;
        let mut entries = Vec::new();
        for line in stdout.lines() {
            if line.len() < 4 {
                continue;
            }
            let code = line[..2].to_string();
            // Renames show as "old -> new"; the new path is the live one.
            let path = line[3..]
                .rsplit(" -> ")
                .next()
                .unwrap_or(&line[3..])
                .trim_matches('"')
                .to_string();
            entries.push((code, path));
        }
        Ok(entries)
    }
}

impl VersionControl for GitRepo {
    fn modified_files(&self) -> Result<Vec<String>> {
        Ok(self
            .status_entries()?
            .into_iter()
            .filter(|(code, _)| code.contains('M') || code.contains('A') || code.contains('R'))
            .map(|(_, path)| path)
            .collect())
    }

    fn untracked_files(&self) -> Result<Vec<String>> {
        Ok(self
            .status_entries()?
            .into_iter()
            .filter(|(code, _)| code == "??")
            .map(|(_, path)| path)
            .collect())
    }

    fn uncommitted_deletions(&self) -> Result<Vec<String>> {
        Ok(self
            .status_entries()?
            .into_iter()
            .filter(|(code, _)| code.contains('D'))
            .map(|(_, path)| path)
            .collect())
    }

    fn commit_changes(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }

        let mut add_args = vec!["add", "--all", "--"];
        add_args.extend(paths.iter().map(|p| p.as_str()));
        self.git(&add_args)?;

        // Staging can be a no-op (e.g. the same paths were committed by a
        // concurrent writer); a commit with nothing staged must not fail.
        let staged = self.git(&["diff", "--cached", "--name-only"])?;
        if staged.trim().is_empty() {
            return Ok(());
        }

        self.git(&["commit", "-m", "notekeep: sync working tree"])?;
        Ok(())
    }

    fn current_revision(&self) -> Result<String> {
        let sha = self.git(&["rev-parse", "HEAD"])?;
        Ok(sha.trim().to_string())
    }

    fn files_changed_between(&self, from: &str, to: &str) -> Result<Vec<String>> {
        let range = format!("{from}..{to}");
        let stdout = self.git(&["diff", "--name-only", "--diff-filter=d", &range])?;
        Ok(stdout.lines().map(|l| l.trim().to_string()).collect())
    }

    fn files_deleted_between(&self, from: &str, to: &str) -> Result<Vec<String>> {
        let range = format!("{from}..{to}");
        let stdout = self.git(&["diff", "--name-only", "--diff-filter=D", &range])?;
        Ok(stdout.lines().map(|l| l.trim().to_string()).collect())
    }
}
