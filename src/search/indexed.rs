//! Ranked search over a SQLite FTS5 index.
//!
//! Each tracked file has one raw-content row in `note_content` and one
//! tokenized row in `note_fts`. A reindex visits every tracked file; a
//! content hash per row lets it skip files whose bytes are unchanged, which
//! leaves the exact index state a full delete+insert of the same content
//! would. When the hash differs, replacement is always delete+insert of
//! both rows, so a reindex can never leave stale tokenization behind.
//! Queries
//! rank by bm25 (ascending rank = more relevant); if the ranked query fails
//! for any reason the engine degrades to a manual substring scan over the
//! raw content, logging a warning instead of surfacing the failure.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use super::{effective_limit, SearchEngine};
use crate::db;
use crate::library::Library;
use crate::models::NoteRef;

pub struct IndexedEngine {
    pool: SqlitePool,
    library: Arc<Library>,
}

impl IndexedEngine {
    pub async fn open(db_path: &Path, library: Arc<Library>) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        Ok(Self { pool, library })
    }

    async fn replace_entry(&self, path: &str, content: &str, hash: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM note_fts WHERE path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM note_content WHERE path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO note_content (path, content, hash) VALUES (?, ?, ?)")
            .bind(path)
            .bind(content)
            .bind(hash)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO note_fts (path, content) VALUES (?, ?)")
            .bind(path)
            .bind(content)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn remove_stale(&self, live: &[String]) -> Result<()> {
        let indexed: Vec<String> = sqlx::query_scalar("SELECT path FROM note_content")
            .fetch_all(&self.pool)
            .await?;
        for path in indexed {
            if !live.contains(&path) {
                sqlx::query("DELETE FROM note_fts WHERE path = ?")
                    .bind(&path)
                    .execute(&self.pool)
                    .await?;
                sqlx::query("DELETE FROM note_content WHERE path = ?")
                    .bind(&path)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn ranked_query(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        // A file can match on several tokenized segments, so over-fetch
        // before deduplicating by path and truncating to the caller limit.
        let fetch = std::cmp::max(limit * 10, 100) as i64;

        let rows = sqlx::query(
            r#"
            SELECT path FROM note_fts
            WHERE note_fts MATCH ?
            ORDER BY rank, path
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(fetch)
        .fetch_all(&self.pool)
        .await?;

        let mut seen = std::collections::HashSet::new();
        let mut paths = Vec::new();
        for row in &rows {
            let path: String = row.get("path");
            if seen.insert(path.clone()) {
                paths.push(path);
            }
            if paths.len() == limit {
                break;
            }
        }
        Ok(paths)
    }

    async fn manual_scan(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        let needle = query.to_lowercase();
        let rows = sqlx::query("SELECT path, content FROM note_content ORDER BY path")
            .fetch_all(&self.pool)
            .await?;

        let mut paths = Vec::new();
        for row in &rows {
            let content: String = row.get("content");
            if content.to_lowercase().contains(&needle) {
                paths.push(row.get("path"));
                if paths.len() == limit {
                    break;
                }
            }
        }
        Ok(paths)
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[async_trait]
impl SearchEngine for IndexedEngine {
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS note_content (
                path TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // FTS5 CREATE is not idempotent natively, so check first.
        let fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='note_fts'",
        )
        .fetch_one(&self.pool)
        .await?;

        if !fts_exists {
            sqlx::query(
                r#"
                CREATE VIRTUAL TABLE note_fts USING fts5(
                    path UNINDEXED,
                    content
                )
                "#,
            )
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn index_all_files(&self) -> Result<()> {
        let files = self.library.list_files()?;

        for path in &files {
            let content = match self.library.read(path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path, error = %e, "skipping unreadable file during reindex");
                    continue;
                }
            };

            let hash = content_hash(&content);
            let indexed: Option<String> =
                sqlx::query_scalar("SELECT hash FROM note_content WHERE path = ?")
                    .bind(path)
                    .fetch_optional(&self.pool)
                    .await?;
            if indexed.as_deref() == Some(hash.as_str()) {
                continue;
            }
            self.replace_entry(path, &content, &hash).await?;
        }

        self.remove_stale(&files).await?;
        Ok(())
    }

    async fn search_files(&self, query: &str, limit: i64) -> Result<Vec<NoteRef>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let limit = effective_limit(limit);

        let paths = match self.ranked_query(query, limit).await {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, "ranked query failed, falling back to manual scan");
                self.manual_scan(query, limit).await?
            }
        };

        Ok(paths.iter().map(|p| NoteRef::from_path(p)).collect())
    }

    fn kind(&self) -> &'static str {
        "indexed"
    }
}
