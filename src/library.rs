//! Working-tree collaborator: lists and reads note files under the library
//! root, applying the configured include/exclude glob sets.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::LibraryConfig;

pub struct Library {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
}

impl Library {
    pub fn new(config: &LibraryConfig) -> Result<Self> {
        if !config.root.exists() {
            bail!("Library root does not exist: {}", config.root.display());
        }

        let include = build_globset(&config.include_globs)?;

        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/.trash/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(config.exclude_globs.clone());
        let exclude = build_globset(&default_excludes)?;

        Ok(Self {
            root: config.root.clone(),
            include,
            exclude,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a relative path belongs to the note universe.
    pub fn is_tracked(&self, relative: &str) -> bool {
        !self.exclude.is_match(relative) && self.include.is_match(relative)
    }

    /// List all tracked files as relative paths, sorted for deterministic
    /// ordering.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if !self.is_tracked(&rel_str) {
                continue;
            }

            files.push(rel_str);
        }

        files.sort();
        Ok(files)
    }

    /// Read a tracked file's content as UTF-8.
    pub fn read(&self, relative: &str) -> Result<String> {
        let full = self.root.join(relative);
        std::fs::read_to_string(&full)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", full.display(), e))
    }

    /// File size in bytes.
    pub fn size_of(&self, relative: &str) -> Result<u64> {
        Ok(std::fs::metadata(self.root.join(relative))?.len())
    }

    /// Last modification time as Unix seconds; 0 when unavailable.
    pub fn modified_secs(&self, relative: &str) -> i64 {
        std::fs::metadata(self.root.join(relative))
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
