//! In-memory substring engine.
//!
//! Builds a full `path -> {title, content, tags}` map at index time and
//! answers queries with case-insensitive substring containment across all
//! three fields. Rebuilds are full (never incremental): the replacement map
//! is assembled off-lock, then swapped in under the write lock; lookups only
//! take the read lock.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

use super::{effective_limit, SearchEngine};
use crate::library::Library;
use crate::models::{NoteMetadata, NoteRef};
use crate::storage::KeyValueStore;

struct Entry {
    title: String,
    content: String,
    tags: Vec<String>,
}

impl Entry {
    fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self.content.to_lowercase().contains(needle)
            || self.tags.iter().any(|t| t.to_lowercase().contains(needle))
    }
}

pub struct MemoryEngine {
    library: Arc<Library>,
    metadata: Arc<dyn KeyValueStore>,
    index: RwLock<HashMap<String, Entry>>,
}

impl MemoryEngine {
    pub fn new(library: Arc<Library>, metadata: Arc<dyn KeyValueStore>) -> Self {
        Self {
            library,
            metadata,
            index: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SearchEngine for MemoryEngine {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn index_all_files(&self) -> Result<()> {
        let records = self.metadata.get_all().await?;
        let mut fresh = HashMap::new();

        for path in self.library.list_files()? {
            let content = match self.library.read(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path, error = %e, "skipping unreadable file during rebuild");
                    continue;
                }
            };

            let record = records
                .get(&path)
                .and_then(|bytes| serde_json::from_slice::<NoteMetadata>(bytes).ok());
            let (title, tags) = match record {
                Some(r) => (r.title, r.tags),
                None => (NoteRef::from_path(&path).name, Vec::new()),
            };

            fresh.insert(
                path,
                Entry {
                    title,
                    content,
                    tags,
                },
            );
        }

        let mut index = self.index.write().expect("index lock poisoned");
        *index = fresh;
        Ok(())
    }

    async fn search_files(&self, query: &str, limit: i64) -> Result<Vec<NoteRef>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let limit = effective_limit(limit);
        let needle = query.to_lowercase();

        let index = self.index.read().expect("index lock poisoned");
        let mut paths: Vec<&String> = index
            .iter()
            .filter(|(_, entry)| entry.matches(&needle))
            .map(|(path, _)| path)
            .collect();
        paths.sort();
        paths.truncate(limit);

        Ok(paths.iter().map(|p| NoteRef::from_path(p)).collect())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
