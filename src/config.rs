use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_METADATA_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SEARCH_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub library: LibraryConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SyncConfig {
    /// Interval string for the metadata job, e.g. "5m", "90s", "1h".
    #[serde(default)]
    pub metadata_interval: Option<String>,
    /// Interval string for the search reindex job.
    #[serde(default)]
    pub search_interval: Option<String>,
}

impl SyncConfig {
    /// Metadata-job interval; invalid or missing values fall back to 5m.
    pub fn metadata_interval(&self) -> Duration {
        resolve_interval(
            self.metadata_interval.as_deref(),
            "sync.metadata_interval",
            DEFAULT_METADATA_INTERVAL,
        )
    }

    /// Search-job interval; invalid or missing values fall back to 15m.
    pub fn search_interval(&self) -> Duration {
        resolve_interval(
            self.search_interval.as_deref(),
            "sync.search_interval",
            DEFAULT_SEARCH_INTERVAL,
        )
    }
}

fn resolve_interval(value: Option<&str>, key: &str, default: Duration) -> Duration {
    match value {
        None => default,
        Some(raw) => match parse_interval(raw) {
            Some(d) if !d.is_zero() => d,
            _ => {
                warn!(key, value = raw, "invalid interval, using default");
                default
            }
        },
    }
}

/// Parse a duration string of the form `<n>s`, `<n>m`, `<n>h`, or a bare
/// number of seconds. Returns `None` for anything else.
pub fn parse_interval(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (digits, unit) = match raw.chars().last() {
        Some(c) if c.is_ascii_digit() => (raw, "s"),
        Some('s') => (&raw[..raw.len() - 1], "s"),
        Some('m') => (&raw[..raw.len() - 1], "m"),
        Some('h') => (&raw[..raw.len() - 1], "h"),
        _ => return None,
    };
    let n: u64 = digits.trim().parse().ok()?;
    let secs = match unit {
        "m" => n.checked_mul(60)?,
        "h" => n.checked_mul(3600)?,
        _ => n,
    };
    Some(Duration::from_secs(secs))
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_engine")]
    pub engine: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
        }
    }
}

fn default_engine() -> String {
    "indexed".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_metadata_backend")]
    pub metadata: String,
    #[serde(default = "default_search_backend")]
    pub search: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            metadata: default_metadata_backend(),
            search: default_search_backend(),
        }
    }
}

fn default_metadata_backend() -> String {
    "json".to_string()
}

fn default_search_backend() -> String {
    "sqlite".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.library.include_globs.is_empty() {
        anyhow::bail!("library.include_globs must not be empty");
    }

    Ok(config)
}
