//! Search engine strategies.
//!
//! Three interchangeable engines sit behind [`SearchEngine`]: a ranked FTS5
//! index ([`indexed`]), an in-memory substring map ([`memory`]), and a direct
//! scan over the working tree ([`scan`]). The engine is selected once at
//! startup; an unknown kind falls back to the ranked index with a warning.

pub mod indexed;
pub mod memory;
pub mod scan;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;
use crate::library::Library;
use crate::models::NoteRef;
use crate::storage::KeyValueStore;

/// Result cap applied when the caller passes `limit <= 0`.
pub const DEFAULT_LIMIT: i64 = 20;

pub(crate) fn effective_limit(limit: i64) -> usize {
    if limit <= 0 {
        DEFAULT_LIMIT as usize
    } else {
        limit as usize
    }
}

/// A text search strategy over the note universe.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Prepare the engine's backing storage. No-op for engines without one.
    async fn initialize(&self) -> Result<()>;

    /// Rebuild the index from every currently tracked file. Entries are
    /// fully replaced, never partially updated.
    async fn index_all_files(&self) -> Result<()>;

    /// Answer a text query with up to `limit` results. An empty query
    /// returns an empty set without touching any backend; `limit <= 0`
    /// means the engine default.
    async fn search_files(&self, query: &str, limit: i64) -> Result<Vec<NoteRef>>;

    /// Engine kind identifier (`"indexed"`, `"memory"`, `"grep"`).
    fn kind(&self) -> &'static str;
}

/// Construct the configured engine.
///
/// The search storage backend only supports SQLite; any other configured
/// kind is rejected with a warning and SQLite is used. Unknown engine kinds
/// fall back to the ranked index.
pub async fn open_engine(
    config: &Config,
    library: Arc<Library>,
    metadata: Arc<dyn KeyValueStore>,
) -> Result<Arc<dyn SearchEngine>> {
    match config.search.engine.as_str() {
        "memory" => Ok(Arc::new(memory::MemoryEngine::new(library, metadata))),
        "grep" => Ok(Arc::new(scan::ScanEngine::new(library))),
        kind => {
            if kind != "indexed" {
                warn!(kind, "unknown search engine, falling back to indexed");
            }
            if config.storage.search != "sqlite" {
                warn!(
                    kind = config.storage.search.as_str(),
                    "unsupported search storage backend, falling back to sqlite"
                );
            }
            let engine = indexed::IndexedEngine::open(&config.db.path, library).await?;
            Ok(Arc::new(engine))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults() {
        assert_eq!(effective_limit(0), DEFAULT_LIMIT as usize);
        assert_eq!(effective_limit(-3), DEFAULT_LIMIT as usize);
        assert_eq!(effective_limit(7), 7);
    }
}
