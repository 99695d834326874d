//! Relational store backed by SQLite.
//!
//! For the metadata domain, records are shredded into one row per note with
//! one column per structured field, so collection/file-type/status/priority
//! queries can use indexes. The verbatim payload is stored alongside the
//! columns and is what `get` returns, so callers see byte-for-byte the same
//! JSON as the document store regardless of column precision or fields the
//! record type does not know about. Other domains use a plain key/value
//! table.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use super::{Domain, KeyValueStore};
use crate::db;
use crate::models::NoteMetadata;

pub struct SqliteStore {
    pool: SqlitePool,
    domain: Domain,
}

impl SqliteStore {
    /// Open the store for one domain, creating its schema if missing.
    pub async fn open(db_path: &Path, domain: Domain) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        let store = Self { pool, domain };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        if self.domain == Domain::Metadata {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS notes (
                    path TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    title TEXT NOT NULL,
                    created_at INTEGER,
                    last_edited INTEGER,
                    target_date TEXT,
                    collection TEXT,
                    folders TEXT NOT NULL DEFAULT '[]',
                    tags TEXT NOT NULL DEFAULT '[]',
                    boards TEXT NOT NULL DEFAULT '[]',
                    links TEXT NOT NULL DEFAULT '{}',
                    file_type TEXT NOT NULL DEFAULT '',
                    para TEXT NOT NULL DEFAULT '{}',
                    status TEXT,
                    priority INTEGER,
                    size INTEGER NOT NULL DEFAULT 0,
                    payload BLOB NOT NULL
                )
                "#,
            )
            .execute(&self.pool)
            .await?;

            sqlx::query("CREATE INDEX IF NOT EXISTS idx_notes_collection ON notes(collection)")
                .execute(&self.pool)
                .await?;
            sqlx::query("CREATE INDEX IF NOT EXISTS idx_notes_file_type ON notes(file_type)")
                .execute(&self.pool)
                .await?;
            sqlx::query("CREATE INDEX IF NOT EXISTS idx_notes_status ON notes(status)")
                .execute(&self.pool)
                .await?;
            sqlx::query("CREATE INDEX IF NOT EXISTS idx_notes_priority ON notes(priority)")
                .execute(&self.pool)
                .await?;
        }

        // Every domain gets a key/value table; for metadata it holds the
        // rare payloads that do not parse as records (tolerated writes).
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            )
            "#,
            self.kv_table()
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn kv_table(&self) -> String {
        format!("kv_{}", self.domain.as_str())
    }

    async fn set_note_row(&self, key: &str, record: &NoteMetadata, payload: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notes (path, name, title, created_at, last_edited, target_date,
                               collection, folders, tags, boards, links, file_type, para,
                               status, priority, size, payload)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                name = excluded.name,
                title = excluded.title,
                created_at = excluded.created_at,
                last_edited = excluded.last_edited,
                target_date = excluded.target_date,
                collection = excluded.collection,
                folders = excluded.folders,
                tags = excluded.tags,
                boards = excluded.boards,
                links = excluded.links,
                file_type = excluded.file_type,
                para = excluded.para,
                status = excluded.status,
                priority = excluded.priority,
                size = excluded.size,
                payload = excluded.payload
            "#,
        )
        .bind(key)
        .bind(&record.name)
        .bind(&record.title)
        .bind(record.created_at.map(|t| t.timestamp()))
        .bind(record.last_edited.map(|t| t.timestamp()))
        .bind(record.target_date.map(|d| d.to_string()))
        .bind(&record.collection)
        .bind(serde_json::to_string(&record.folders)?)
        .bind(serde_json::to_string(&record.tags)?)
        .bind(serde_json::to_string(&record.boards)?)
        .bind(serde_json::to_string(&record.links)?)
        .bind(&record.file_type)
        .bind(serde_json::to_string(&record.para)?)
        .bind(&record.status)
        .bind(record.priority)
        .bind(record.size as i64)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        // A parsed write supersedes any earlier overflow payload.
        sqlx::query(&format!("DELETE FROM {} WHERE key = ?", self.kv_table()))
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_note_row(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let payload: Option<Vec<u8>> = sqlx::query_scalar("SELECT payload FROM notes WHERE path = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(ref bytes) = payload {
            serde_json::from_slice::<serde_json::Value>(bytes)
                .with_context(|| format!("Stored record for {key:?} is not valid JSON"))?;
        }
        Ok(payload)
    }

    async fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> = sqlx::query_scalar(&format!(
            "SELECT value FROM {} WHERE key = ?",
            self.kv_table()
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn kv_set(&self, key: &str, value: &[u8]) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            self.kv_table()
        ))
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.domain == Domain::Metadata {
            if let Some(payload) = self.get_note_row(key).await? {
                return Ok(Some(payload));
            }
        }
        let value = self.kv_get(key).await?;
        if let Some(ref bytes) = value {
            serde_json::from_slice::<serde_json::Value>(bytes)
                .with_context(|| format!("Stored value for {key:?} is not valid JSON"))?;
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        if self.domain == Domain::Metadata {
            match serde_json::from_slice::<NoteMetadata>(value) {
                Ok(record) => return self.set_note_row(key, &record, value).await,
                Err(e) => {
                    // Tolerated: persisted verbatim in the overflow table so
                    // the two backends stay write-compatible.
                    warn!(key, error = %e, "payload is not a metadata record, storing verbatim");
                    sqlx::query("DELETE FROM notes WHERE path = ?")
                        .bind(key)
                        .execute(&self.pool)
                        .await?;
                }
            }
        } else if serde_json::from_slice::<serde_json::Value>(value).is_err() {
            warn!(key, "persisting payload that is not valid JSON");
        }
        self.kv_set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.domain == Domain::Metadata {
            sqlx::query("DELETE FROM notes WHERE path = ?")
                .bind(key)
                .execute(&self.pool)
                .await?;
        }
        sqlx::query(&format!("DELETE FROM {} WHERE key = ?", self.kv_table()))
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_all(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut all = BTreeMap::new();

        if self.domain == Domain::Metadata {
            let rows = sqlx::query("SELECT path, payload FROM notes")
                .fetch_all(&self.pool)
                .await?;
            for row in rows {
                all.insert(row.get("path"), row.get("payload"));
            }
        }

        let rows = sqlx::query(&format!("SELECT key, value FROM {}", self.kv_table()))
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            all.insert(row.get("key"), row.get("value"));
        }

        Ok(all)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = Vec::new();

        if self.domain == Domain::Metadata {
            keys.extend(
                sqlx::query_scalar::<_, String>("SELECT path FROM notes")
                    .fetch_all(&self.pool)
                    .await?,
            );
        }
        keys.extend(
            sqlx::query_scalar::<_, String>(&format!("SELECT key FROM {}", self.kv_table()))
                .fetch_all(&self.pool)
                .await?,
        );

        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if self.domain == Domain::Metadata {
            let found: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM notes WHERE path = ?")
                .bind(key)
                .fetch_one(&self.pool)
                .await?;
            if found {
                return Ok(true);
            }
        }
        let found: bool = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) > 0 FROM {} WHERE key = ?",
            self.kv_table()
        ))
        .bind(key)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    fn kind(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LinkRelations, NoteMetadata};
    use chrono::{NaiveDate, TimeZone, Utc};
    use tempfile::TempDir;

    async fn open_tmp(domain: Domain) -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("notekeep.sqlite"), domain)
            .await
            .unwrap();
        (tmp, store)
    }

    fn sample_record() -> NoteMetadata {
        NoteMetadata {
            name: "plan".to_string(),
            title: "Quarterly Plan".to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).single(),
            last_edited: Utc.timestamp_opt(1_700_000_100, 0).single(),
            target_date: NaiveDate::from_ymd_opt(2026, 9, 15),
            collection: Some("planning".to_string()),
            folders: vec!["work".to_string()],
            tags: vec!["q3".to_string(), "work".to_string()],
            boards: vec![],
            links: LinkRelations {
                used_links: vec!["work/other.md".to_string()],
                ..Default::default()
            },
            file_type: "md".to_string(),
            status: Some("active".to_string()),
            priority: Some(1),
            size: 420,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn metadata_round_trips_byte_for_byte() {
        let (_tmp, store) = open_tmp(Domain::Metadata).await;
        let payload = serde_json::to_vec(&sample_record()).unwrap();

        store.set("work/plan.md", &payload).await.unwrap();
        let back = store.get("work/plan.md").await.unwrap().unwrap();
        assert_eq!(back, payload);

        let record: NoteMetadata = serde_json::from_slice(&back).unwrap();
        assert_eq!(record, sample_record());
    }

    #[tokio::test]
    async fn empty_arrays_survive_the_relational_round_trip() {
        let (_tmp, store) = open_tmp(Domain::Metadata).await;
        let record = NoteMetadata {
            name: "bare".to_string(),
            title: "bare".to_string(),
            ..Default::default()
        };
        let payload = serde_json::to_vec(&record).unwrap();

        store.set("bare.md", &payload).await.unwrap();
        let back: NoteMetadata =
            serde_json::from_slice(&store.get("bare.md").await.unwrap().unwrap()).unwrap();
        assert!(back.tags.is_empty());
        assert!(back.links.used_links.is_empty());
        assert_eq!(back, record);
    }

    #[tokio::test]
    async fn subsecond_timestamps_round_trip() {
        let (_tmp, store) = open_tmp(Domain::Metadata).await;
        let record = NoteMetadata {
            name: "precise".to_string(),
            title: "Precise".to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000, 123_456_789).single(),
            last_edited: Utc.timestamp_opt(1_700_000_100, 987_654_321).single(),
            ..Default::default()
        };
        let payload = serde_json::to_vec(&record).unwrap();

        store.set("precise.md", &payload).await.unwrap();
        let back = store.get("precise.md").await.unwrap().unwrap();
        assert_eq!(back, payload, "sub-second timestamps must round-trip");

        let parsed: NoteMetadata = serde_json::from_slice(&back).unwrap();
        assert_eq!(parsed.created_at, record.created_at);
    }

    #[tokio::test]
    async fn unknown_fields_in_record_payloads_are_preserved() {
        let (_tmp, store) = open_tmp(Domain::Metadata).await;
        // Parses as a record, but carries a field the record type does not know.
        let payload =
            br#"{"name":"n","title":"t","created_at":null,"last_edited":null,"custom":"kept"}"#;

        store.set("n.md", payload).await.unwrap();
        let back = store.get("n.md").await.unwrap().unwrap();
        assert_eq!(back, payload.to_vec());

        let all = store.get_all().await.unwrap();
        assert_eq!(all.get("n.md").unwrap(), &payload.to_vec());
    }

    #[tokio::test]
    async fn non_record_payload_is_tolerated_verbatim() {
        let (_tmp, store) = open_tmp(Domain::Metadata).await;

        store.set("odd", br#"{"just":"json"}"#).await.unwrap();
        assert_eq!(
            store.get("odd").await.unwrap().unwrap(),
            br#"{"just":"json"}"#.to_vec()
        );
        assert!(store.exists("odd").await.unwrap());

        store.delete("odd").await.unwrap();
        assert!(!store.exists("odd").await.unwrap());
    }

    #[tokio::test]
    async fn kv_domain_set_get_list() {
        let (_tmp, store) = open_tmp(Domain::Config).await;

        store.set("sync/last-revision", br#""abc123""#).await.unwrap();
        store.set("theme-dark/accent", br#""teal""#).await.unwrap();

        assert_eq!(
            store.get("sync/last-revision").await.unwrap().unwrap(),
            br#""abc123""#.to_vec()
        );
        assert_eq!(
            store.list("sync/").await.unwrap(),
            vec!["sync/last-revision"]
        );
        assert_eq!(store.get_all().await.unwrap().len(), 2);
    }
}
