use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::AppConfig;
use crate::error::Error;
use crate::hasher::{cache::cache_key, HashCache};
use crate::progress::ProgressReporter;
use crate::reconcile::{reconcile, Classification};
use crate::remote::{FetchWarning, InventorySource};
use crate::scanner::{walk, FolderScanner, ScanFilter, ScanOutcome, SkippedFile};
use crate::storage::{Database, ScanRun, TrackedFile};

pub struct ScanEngine {
    config: AppConfig,
    db_path: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageTimings {
    pub fetch_secs: f64,
    pub torrent_scan_secs: f64,
    pub media_scan_secs: f64,
    pub reconcile_secs: f64,
    pub record_secs: f64,
}

/// Everything one successful run produced, ready for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub scan_id: i64,
    pub run: ScanRun,
    pub classification: Classification,
    /// Snapshot of every row this run touched, after the update.
    pub tracked: Vec<TrackedFile>,
    pub eligible_for_action: Vec<TrackedFile>,
    pub fetch_warnings: Vec<FetchWarning>,
    pub skipped_files: Vec<SkippedFile>,
    pub timings: StageTimings,
}

impl ScanEngine {
    pub fn new(config: AppConfig) -> Self {
        let db_path = config.sqlite_cache_path.clone();
        Self { config, db_path }
    }

    pub fn with_db_path(mut self, path: &str) -> Self {
        self.db_path = path.to_string();
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Run the full reconciliation pipeline:
    /// 1. Fetch the daemon's inventory (one bulk call)
    /// 2. Scan the torrent tree, then the media tree unless skipped
    /// 3. Reconcile the three inventories
    /// 4. Apply the result to the lifecycle store in one transaction
    ///
    /// Cancellation is honoured between stages. A failed fetch ends the run
    /// before anything is written.
    pub fn run(
        &self,
        remote: &dyn InventorySource,
        reporter: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<RunReport, Error> {
        let torrent_root = self.config.torrent_root();
        let media_root = self.config.media_root();
        let skip_media = self.config.skip_media_check;

        let mut paths_scanned = vec![torrent_root.display().to_string()];
        if !skip_media {
            paths_scanned.push(media_root.display().to_string());
        }
        let host = remote.host_identity();
        let mut scan_run = ScanRun::begin(host.clone(), paths_scanned);
        let mut timings = StageTimings::default();

        // Stage 1: remote inventory
        cancel.check("remote fetch")?;
        info!("Fetching remote inventory from {}...", host);
        reporter.on_fetch_start(&host);
        let fetch_start = Instant::now();
        let inventory = remote.fetch_all()?;
        timings.fetch_secs = fetch_start.elapsed().as_secs_f64();
        reporter.on_fetch_complete(inventory.items.len(), inventory.file_count(), timings.fetch_secs);
        debug!(
            "Fetch completed in {:.2}s: {} items, {} files",
            timings.fetch_secs,
            inventory.items.len(),
            inventory.file_count()
        );

        // Stage 2: local trees
        cancel.check("torrent folder scan")?;
        let cache = HashCache::open(&self.db_path)?;
        let filter = self.config.scan_filter();
        let scan_start = Instant::now();
        let torrents = FolderScanner::new(&torrent_root, &filter, &cache)
            .with_threads(self.config.hash_threads)
            .scan(reporter, cancel)?;
        timings.torrent_scan_secs = scan_start.elapsed().as_secs_f64();

        cancel.check("media folder scan")?;
        let media = if skip_media {
            info!("Skipping media folder scan");
            None
        } else {
            let media_start = Instant::now();
            let outcome = FolderScanner::new(&media_root, &filter, &cache)
                .with_threads(self.config.hash_threads)
                .scan(reporter, cancel)?;
            timings.media_scan_secs = media_start.elapsed().as_secs_f64();
            Some(outcome)
        };

        // Stage 3: reconcile
        cancel.check("reconciliation")?;
        info!("Reconciling inventories...");
        let reconcile_start = Instant::now();
        let classification = reconcile(
            &torrents.entries,
            media.as_ref().map(|m| m.entries.as_slice()),
            &inventory,
            &self.config.report_rule(),
        );
        timings.reconcile_secs = reconcile_start.elapsed().as_secs_f64();

        // Stage 4: lifecycle store
        cancel.check("lifecycle update")?;
        info!("Writing to database...");
        reporter.on_db_write_start();
        let record_start = Instant::now();
        scan_run.finish();
        let db = Database::open(&self.db_path)?;
        let record = db.record_scan(&classification, &scan_run, &self.config.deletion_policy())?;
        timings.record_secs = record_start.elapsed().as_secs_f64();
        reporter.on_db_write_complete(record.tracked.len(), timings.record_secs);

        let skipped_files = collect_skipped(&torrents, media.as_ref());
        info!(
            "Run {} complete: {} orphans ({} bytes), {} media orphans, {} mismatched, {} marked",
            record.scan_id,
            classification.orphans.len(),
            classification.orphan_bytes(),
            classification.media_orphans.len(),
            classification.mismatched.len(),
            record.eligible_for_action.len(),
        );

        Ok(RunReport {
            scan_id: record.scan_id,
            run: scan_run,
            classification,
            tracked: record.tracked,
            eligible_for_action: record.eligible_for_action,
            fetch_warnings: inventory.warnings,
            skipped_files,
            timings,
        })
    }

    /// Drop hash cache entries for files that no longer exist under either
    /// root. A root that is not a directory (e.g. an unmounted share) is left
    /// alone so its entries survive.
    pub fn prune_hash_cache(&self) -> Result<usize, Error> {
        let cache = HashCache::open(&self.db_path)?;
        let filter = self.config.scan_filter();

        let mut roots = vec![self.config.torrent_root()];
        if !self.config.skip_media_check {
            roots.push(self.config.media_root());
        }

        let mut removed = 0;
        for root in &roots {
            removed += prune_root(&cache, root, &filter)?;
        }
        Ok(removed)
    }

    pub fn count_hash_cache(&self) -> Result<usize, Error> {
        HashCache::open(&self.db_path)?.len()
    }
}

fn prune_root(cache: &HashCache, root: &Path, filter: &ScanFilter) -> Result<usize, Error> {
    if !root.is_dir() {
        warn!("Not pruning cache for {}: not a directory", root.display());
        return Ok(0);
    }

    let existing: HashSet<String> = walk(root, filter)
        .filter_map(Result::ok)
        .map(|candidate| cache_key(&candidate.path))
        .collect();
    debug!("{} files present under {}", existing.len(), root.display());
    cache.prune_under(root, &existing)
}

fn collect_skipped(torrents: &ScanOutcome, media: Option<&ScanOutcome>) -> Vec<SkippedFile> {
    torrents
        .skipped
        .iter()
        .chain(media.into_iter().flat_map(|m| m.skipped.iter()))
        .cloned()
        .collect()
}
