//! Sync orchestration.
//!
//! [`SyncService`] is the explicit handle object wiring the change detector,
//! the metadata extractor, the storage domains, and the search engine
//! together; it is constructed once at startup and injected wherever sync
//! can be triggered. [`Scheduler`] runs the two periodic jobs (metadata
//! sync, search reindex) as independent tokio loops sharing one stop
//! signal.
//!
//! Ordering guarantees per metadata cycle: deletions are applied before
//! upserts, and the revision marker advances only after the whole batch has
//! been processed, so a crash mid-batch re-attempts the same range
//! (at-least-once reprocessing).

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::detect::ChangeDetector;
use crate::extract::extract_metadata;
use crate::library::Library;
use crate::models::{BatchReport, ItemOutcome, NoteMetadata};
use crate::search::{open_engine, SearchEngine};
use crate::storage::{open_store, Domain, KeyValueStore};
use crate::vcs::{GitRepo, VersionControl};

pub struct SyncService {
    detector: ChangeDetector,
    library: Arc<Library>,
    metadata: Arc<dyn KeyValueStore>,
    cache: Arc<dyn KeyValueStore>,
    engine: Arc<dyn SearchEngine>,
    // Non-reentrancy gates: a tick is skipped if the previous tick of the
    // same job is still in flight.
    metadata_gate: tokio::sync::Mutex<()>,
    search_gate: tokio::sync::Mutex<()>,
}

impl SyncService {
    pub fn new(
        detector: ChangeDetector,
        library: Arc<Library>,
        metadata: Arc<dyn KeyValueStore>,
        cache: Arc<dyn KeyValueStore>,
        engine: Arc<dyn SearchEngine>,
    ) -> Self {
        Self {
            detector,
            library,
            metadata,
            cache,
            engine,
            metadata_gate: tokio::sync::Mutex::new(()),
            search_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Build the full pipeline from configuration: library, git collaborator,
    /// storage domains, and the configured search engine (initialized).
    pub async fn from_config(config: &Config) -> Result<Self> {
        let library = Arc::new(Library::new(&config.library)?);
        let vcs: Arc<dyn VersionControl> = Arc::new(GitRepo::new(&config.library.root));

        let config_store = open_store(&config.storage.metadata, Domain::Config, config).await?;
        let metadata = open_store(&config.storage.metadata, Domain::Metadata, config).await?;
        let cache = open_store(&config.storage.metadata, Domain::Cache, config).await?;

        let engine = open_engine(config, library.clone(), metadata.clone()).await?;
        engine
            .initialize()
            .await
            .context("Failed to initialize search engine")?;

        let detector = ChangeDetector::new(vcs, config_store, library.clone());
        Ok(Self::new(detector, library, metadata, cache, engine))
    }

    pub fn engine(&self) -> &Arc<dyn SearchEngine> {
        &self.engine
    }

    pub fn metadata_store(&self) -> &Arc<dyn KeyValueStore> {
        &self.metadata
    }

    /// One metadata tick. Returns `None` when the previous tick of this job
    /// is still running (the tick is skipped, not queued).
    pub async fn run_metadata_cycle(&self) -> Result<Option<BatchReport>> {
        let Ok(_guard) = self.metadata_gate.try_lock() else {
            info!("metadata cycle still in flight, skipping tick");
            return Ok(None);
        };
        Ok(Some(self.metadata_cycle().await?))
    }

    /// One search reindex tick. Returns `false` when skipped as busy.
    pub async fn run_search_cycle(&self) -> Result<bool> {
        let Ok(_guard) = self.search_gate.try_lock() else {
            info!("search reindex still in flight, skipping tick");
            return Ok(false);
        };
        self.engine.index_all_files().await?;
        Ok(true)
    }

    /// Operator-invoked immediate resync: metadata first, then search,
    /// synchronously and bypassing the tickers. Waits for in-flight ticks
    /// instead of skipping.
    pub async fn run_now(&self) -> Result<BatchReport> {
        let report = {
            let _guard = self.metadata_gate.lock().await;
            self.metadata_cycle().await?
        };
        let _guard = self.search_gate.lock().await;
        self.engine.index_all_files().await?;
        Ok(report)
    }

    async fn metadata_cycle(&self) -> Result<BatchReport> {
        let set = self.detector.detect().await?;
        let mut report = BatchReport::default();

        // Deletions first: a path purged in this cycle must not be
        // re-upserted by the same cycle.
        for path in &set.deleted {
            match self.metadata.delete(path).await {
                Ok(()) => report.record_purge(path, ItemOutcome::Applied),
                Err(e) => {
                    warn!(path, error = %e, "failed to purge metadata record");
                    report.record_purge(
                        path,
                        ItemOutcome::Skipped {
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }

        for path in &set.changed {
            let existing = match self.metadata.get(path).await {
                Ok(Some(bytes)) => serde_json::from_slice::<NoteMetadata>(&bytes).ok(),
                Ok(None) => None,
                Err(e) => {
                    warn!(path, error = %e, "ignoring unreadable stored record");
                    None
                }
            };

            let outcome = match extract_metadata(&self.library, path, existing.as_ref()) {
                Ok(record) => match serde_json::to_vec(&record) {
                    Ok(payload) => match self.metadata.set(path, &payload).await {
                        Ok(()) => ItemOutcome::Applied,
                        Err(e) => {
                            warn!(path, error = %e, "failed to store metadata record");
                            ItemOutcome::Skipped {
                                reason: e.to_string(),
                            }
                        }
                    },
                    Err(e) => ItemOutcome::Skipped {
                        reason: e.to_string(),
                    },
                },
                Err(e) => {
                    warn!(path, error = %e, "failed to extract metadata");
                    ItemOutcome::Skipped {
                        reason: e.to_string(),
                    }
                }
            };
            report.record_upsert(path, outcome);
        }

        if !set.is_empty() {
            if let Err(e) = self.refresh_derived().await {
                warn!(error = %e, "failed to refresh derived data");
            }
        }

        // Marker advances only after the full batch has been processed, and
        // only when the revision actually moved.
        if let Some(revision) = &set.revision {
            if self.detector.last_marker().await?.as_deref() != Some(revision) {
                self.detector.advance_marker(revision).await?;
            }
        }

        Ok(report)
    }

    /// Post-batch pass: recompute reverse link relations across the record
    /// set and persist aggregate counters to the cache domain. Only records
    /// whose reverse sets actually changed are rewritten.
    async fn refresh_derived(&self) -> Result<()> {
        let all = self.metadata.get_all().await?;
        let mut records: BTreeMap<String, NoteMetadata> = BTreeMap::new();
        for (path, bytes) in &all {
            if let Ok(record) = serde_json::from_slice::<NoteMetadata>(bytes) {
                records.insert(path.clone(), record);
            }
        }

        let mut kids: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut backlinks: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut collections: BTreeMap<String, u64> = BTreeMap::new();
        let mut tags: BTreeMap<String, u64> = BTreeMap::new();

        for (path, record) in &records {
            for parent in &record.links.parents {
                kids.entry(parent.clone()).or_default().push(path.clone());
            }
            for target in &record.links.used_links {
                backlinks.entry(target.clone()).or_default().push(path.clone());
            }
            if let Some(collection) = &record.collection {
                *collections.entry(collection.clone()).or_default() += 1;
            }
            for tag in &record.tags {
                *tags.entry(tag.clone()).or_default() += 1;
            }
        }

        for (path, record) in records.iter_mut() {
            let new_kids = kids.remove(path).unwrap_or_default();
            let new_backlinks = backlinks.remove(path).unwrap_or_default();
            if record.links.kids != new_kids || record.links.links_to_here != new_backlinks {
                record.links.kids = new_kids;
                record.links.links_to_here = new_backlinks;
                self.metadata
                    .set(path, &serde_json::to_vec(record)?)
                    .await?;
            }
        }

        self.cache
            .set("aggregates/collections", &serde_json::to_vec(&collections)?)
            .await?;
        self.cache
            .set("aggregates/tags", &serde_json::to_vec(&tags)?)
            .await?;

        Ok(())
    }
}

/// Spawns the two periodic jobs. Both run once immediately at startup, then
/// on their own interval; closing the stop channel's sender (or sending
/// `true`) terminates both loops at their next wake.
pub struct Scheduler;

impl Scheduler {
    pub fn spawn(
        service: Arc<SyncService>,
        metadata_every: Duration,
        search_every: Duration,
        stop: watch::Receiver<bool>,
    ) -> (JoinHandle<()>, JoinHandle<()>) {
        let metadata_handle = {
            let service = service.clone();
            let mut stop = stop.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(metadata_every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match service.run_metadata_cycle().await {
                                Ok(Some(report)) => info!(
                                    applied = report.applied(),
                                    skipped = report.skipped(),
                                    "metadata cycle complete"
                                ),
                                Ok(None) => {}
                                Err(e) => error!(error = %e, "metadata cycle failed"),
                            }
                        }
                        _ = stop.changed() => break,
                    }
                }
            })
        };

        let search_handle = {
            let mut stop = stop;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(search_every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match service.run_search_cycle().await {
                                Ok(true) => info!("search reindex complete"),
                                Ok(false) => {}
                                Err(e) => error!(error = %e, "search reindex failed"),
                            }
                        }
                        _ = stop.changed() => break,
                    }
                }
            })
        };

        (metadata_handle, search_handle)
    }
}
