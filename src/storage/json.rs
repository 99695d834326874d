//! JSON-on-disk document store: one serialized document per key.
//!
//! Keys map to files under the store's base directory, with the `/`
//! separator of scoped keys (`scope/key`) becoming directory nesting. An
//! in-memory mirror behind a reader/writer lock serves reads; every write
//! goes to disk before the mirror is updated.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::warn;
use walkdir::WalkDir;

use super::KeyValueStore;

pub struct JsonStore {
    base: PathBuf,
    cache: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl JsonStore {
    /// Open (or create) a store rooted at `base`, loading existing documents
    /// into the mirror. Failure to create or read the directory is fatal.
    pub fn open(base: &Path) -> Result<Self> {
        std::fs::create_dir_all(base)
            .with_context(|| format!("Failed to create store directory: {}", base.display()))?;

        let mut cache = BTreeMap::new();
        for entry in WalkDir::new(base) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let relative = path.strip_prefix(base).unwrap_or(path);
            let key = relative
                .with_extension("")
                .to_string_lossy()
                .replace('\\', "/");
            let value = std::fs::read(path)
                .with_context(|| format!("Failed to read stored document: {}", path.display()))?;
            cache.insert(key, value);
        }

        Ok(Self {
            base: base.to_path_buf(),
            cache: RwLock::new(cache),
        })
    }

    fn file_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.split('/').any(|seg| seg == "..") {
            bail!("Invalid store key: {key:?}");
        }
        Ok(self.base.join(format!("{key}.json")))
    }
}

#[async_trait]
impl KeyValueStore for JsonStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let cache = self.cache.read().expect("store lock poisoned");
        match cache.get(key) {
            None => Ok(None),
            Some(value) => {
                // Malformed stored JSON is surfaced, never silently dropped.
                serde_json::from_slice::<serde_json::Value>(value)
                    .with_context(|| format!("Stored document for {key:?} is not valid JSON"))?;
                Ok(Some(value.clone()))
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let file = self.file_for(key)?;

        if serde_json::from_slice::<serde_json::Value>(value).is_err() {
            // Tolerated: the store is a byte substrate and does not reject
            // writes based on payload validity.
            warn!(key, "persisting payload that is not valid JSON");
        }

        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&file, value)
            .with_context(|| format!("Failed to write document: {}", file.display()))?;

        let mut cache = self.cache.write().expect("store lock poisoned");
        cache.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let file = self.file_for(key)?;
        if file.exists() {
            std::fs::remove_file(&file)
                .with_context(|| format!("Failed to delete document: {}", file.display()))?;
        }
        let mut cache = self.cache.write().expect("store lock poisoned");
        cache.remove(key);
        Ok(())
    }

    async fn get_all(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let cache = self.cache.read().expect("store lock poisoned");
        Ok(cache.clone())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let cache = self.cache.read().expect("store lock poisoned");
        Ok(cache
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let cache = self.cache.read().expect("store lock poisoned");
        Ok(cache.contains_key(key))
    }

    fn kind(&self) -> &'static str {
        "json"
    }
}
