//! Direct-scan engine: no persistent index.
//!
//! Every query re-reads every tracked file from the working tree and does
//! case-insensitive substring containment. Useful for tiny libraries and as
//! a last-resort engine when no index storage is available.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::{effective_limit, SearchEngine};
use crate::library::Library;
use crate::models::NoteRef;

pub struct ScanEngine {
    library: Arc<Library>,
}

impl ScanEngine {
    pub fn new(library: Arc<Library>) -> Self {
        Self { library }
    }
}

#[async_trait]
impl SearchEngine for ScanEngine {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn index_all_files(&self) -> Result<()> {
        Ok(())
    }

    async fn search_files(&self, query: &str, limit: i64) -> Result<Vec<NoteRef>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let limit = effective_limit(limit);
        let needle = query.to_lowercase();

        let mut hits = Vec::new();
        for path in self.library.list_files()? {
            let content = match self.library.read(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path, error = %e, "skipping unreadable file during scan");
                    continue;
                }
            };
            if content.to_lowercase().contains(&needle) {
                hits.push(NoteRef::from_path(&path));
                if hits.len() == limit {
                    break;
                }
            }
        }

        Ok(hits)
    }

    fn kind(&self) -> &'static str {
        "grep"
    }
}
