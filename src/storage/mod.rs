//! Storage abstraction for the pipeline's persisted state.
//!
//! The [`KeyValueStore`] trait defines the per-domain persistence contract:
//! opaque byte values under string keys, partitioned into independent
//! domains (config, metadata, cache, search). Each domain's backend instance
//! exclusively owns its underlying handle for the process lifetime; the two
//! implementations (JSON-on-disk, SQLite) are interchangeable without caller
//! changes.

pub mod json;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;

/// Storage domains. Each domain is backed by its own store instance and
/// shares no state with the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Config,
    Metadata,
    Cache,
    Search,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Config => "config",
            Domain::Metadata => "metadata",
            Domain::Cache => "cache",
            Domain::Search => "search",
        }
    }
}

/// Compose a scoped key (`scope/key`), the convention used for theme- and
/// user-scoped settings. Both backends treat the separator consistently on
/// every operation.
pub fn scoped_key(scope: &str, key: &str) -> String {
    format!("{scope}/{key}")
}

/// Durable key/value persistence for one storage domain.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value; `Ok(None)` means the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Persist a value under a key, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// All key/value pairs in the domain, keyed in sorted order.
    async fn get_all(&self) -> Result<BTreeMap<String, Vec<u8>>>;

    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Whether a key is present.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Backend kind identifier (`"json"` or `"sqlite"`).
    fn kind(&self) -> &'static str;
}

/// Open the store for one domain with the given backend kind.
///
/// An unknown kind falls back to the JSON document store with a logged
/// warning; backend selection is never a fatal error. Failure to open the
/// chosen backend's underlying handle is fatal and propagates.
pub async fn open_store(
    kind: &str,
    domain: Domain,
    config: &Config,
) -> Result<Arc<dyn KeyValueStore>> {
    match kind {
        "sqlite" => {
            let store = sqlite::SqliteStore::open(&config.db.path, domain).await?;
            Ok(Arc::new(store))
        }
        "json" => {
            let store = json::JsonStore::open(&json_store_dir(config, domain))?;
            Ok(Arc::new(store))
        }
        other => {
            warn!(
                kind = other,
                domain = domain.as_str(),
                "unknown storage backend, falling back to json"
            );
            let store = json::JsonStore::open(&json_store_dir(config, domain))?;
            Ok(Arc::new(store))
        }
    }
}

fn json_store_dir(config: &Config, domain: Domain) -> std::path::PathBuf {
    let base = config
        .db
        .path
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."));
    base.join("store").join(domain.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DbConfig, LibraryConfig, SearchConfig, StorageConfig, SyncConfig};
    use tempfile::TempDir;

    fn test_config(tmp: &TempDir) -> Config {
        Config {
            library: LibraryConfig {
                root: tmp.path().to_path_buf(),
                include_globs: vec!["**/*.md".to_string()],
                exclude_globs: vec![],
            },
            db: DbConfig {
                path: tmp.path().join("data/notekeep.sqlite"),
            },
            sync: SyncConfig::default(),
            search: SearchConfig::default(),
            storage: StorageConfig::default(),
        }
    }

    #[tokio::test]
    async fn unknown_backend_kind_falls_back_to_json() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);

        let store = open_store("cassandra", Domain::Metadata, &config)
            .await
            .unwrap();
        assert_eq!(store.kind(), "json");
    }

    #[tokio::test]
    async fn backends_are_interchangeable_for_callers() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let payload = serde_json::to_vec(&crate::models::NoteMetadata {
            name: "a".to_string(),
            title: "A".to_string(),
            tags: vec!["x".to_string()],
            ..Default::default()
        })
        .unwrap();

        for kind in ["json", "sqlite"] {
            let store = open_store(kind, Domain::Metadata, &config).await.unwrap();
            store.set("notes/a.md", &payload).await.unwrap();
            let back = store.get("notes/a.md").await.unwrap().unwrap();
            assert_eq!(back, payload, "kind {kind} must round-trip byte-for-byte");
            assert!(store.exists("notes/a.md").await.unwrap());
            assert_eq!(store.list("notes/").await.unwrap(), vec!["notes/a.md"]);
        }
    }

    #[test]
    fn scoped_key_composition() {
        assert_eq!(scoped_key("theme-dark", "accent"), "theme-dark/accent");
    }
}
