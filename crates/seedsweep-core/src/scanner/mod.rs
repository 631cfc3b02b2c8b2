pub mod filter;
pub mod walk;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::hasher::HashCache;
use crate::progress::ProgressReporter;

pub use filter::ScanFilter;
pub use walk::{walk, Candidate};

const PROGRESS_EVERY: usize = 500;

/// One file observed during a scan. Built fresh every run and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub relative_path: String,
    pub size_bytes: u64,
    pub content_digest: Option<String>,
    pub modification_time: i64,
}

impl Candidate {
    fn into_entry(self, content_digest: Option<String>) -> FileEntry {
        FileEntry {
            relative_path: self.relative_path,
            size_bytes: self.size_bytes,
            content_digest,
            modification_time: self.modification_time,
        }
    }
}

/// A file left out of this run because it could not be read.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

impl SkippedFile {
    fn from_error(fallback: &Path, err: &Error) -> Self {
        let path = match err {
            Error::FileAccess { path, .. } => path.clone(),
            _ => fallback.to_path_buf(),
        };
        Self {
            path,
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub root: PathBuf,
    pub entries: Vec<FileEntry>,
    pub skipped: Vec<SkippedFile>,
}

impl ScanOutcome {
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }
}

/// Scans one tree and resolves digests through the hash cache.
pub struct FolderScanner<'a> {
    root: &'a Path,
    filter: &'a ScanFilter,
    cache: &'a HashCache,
    threads: usize,
}

impl<'a> FolderScanner<'a> {
    pub fn new(root: &'a Path, filter: &'a ScanFilter, cache: &'a HashCache) -> Self {
        Self {
            root,
            filter,
            cache,
            threads: 0,
        }
    }

    /// Size of the hashing pool; 0 lets rayon pick one thread per core.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Files passing the filters, without digests.
    pub fn candidates(&self) -> impl Iterator<Item = Result<Candidate, Error>> + 'a {
        walk(self.root, self.filter)
    }

    /// Lazy, sequential counterpart of [`FolderScanner::scan`]: each item is
    /// hashed (or served from the cache) as it is pulled.
    pub fn entries(&self) -> impl Iterator<Item = Result<FileEntry, Error>> + 'a {
        let cache = self.cache;
        self.candidates().map(move |candidate| {
            let candidate = candidate?;
            let digest =
                cache.get_or_compute(&candidate.path, candidate.size_bytes, candidate.modification_time)?;
            Ok(candidate.into_entry(Some(digest)))
        })
    }

    /// Walk the tree, then hash the candidates on a bounded worker pool.
    ///
    /// Per-file read failures end up in `skipped`; cache persistence
    /// failures and cancellation abort the scan.
    pub fn scan(&self, reporter: &dyn ProgressReporter, cancel: &CancelToken) -> Result<ScanOutcome, Error> {
        if !self.root.is_dir() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("scan root {} is not a directory", self.root.display()),
            )));
        }

        let root_display = self.root.display().to_string();
        info!("Scanning {}...", root_display);
        reporter.on_scan_start(&root_display);
        let walk_start = Instant::now();

        let mut candidates: Vec<Candidate> = Vec::new();
        let mut skipped: Vec<SkippedFile> = Vec::new();
        for item in self.candidates() {
            cancel.check("scan completion")?;
            match item {
                Ok(candidate) => {
                    candidates.push(candidate);
                    if candidates.len() % PROGRESS_EVERY == 0 {
                        reporter.on_scan_progress(candidates.len(), &root_display);
                    }
                }
                Err(err) => {
                    warn!("Skipping unreadable entry: {}", err);
                    skipped.push(SkippedFile::from_error(self.root, &err));
                }
            }
        }
        reporter.on_scan_complete(candidates.len(), walk_start.elapsed().as_secs_f64());

        let total = candidates.len();
        reporter.on_hash_start(total);
        let hash_start = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| Error::Other(format!("Failed to build hashing pool: {}", e)))?;

        let hashed = AtomicUsize::new(0);
        let results: Vec<Result<FileEntry, (PathBuf, Error)>> = pool.install(|| {
            candidates
                .into_par_iter()
                .map(|candidate| {
                    let result = self.cache.get_or_compute_with(
                        &candidate.path,
                        candidate.size_bytes,
                        candidate.modification_time,
                        cancel,
                    );
                    let done = hashed.fetch_add(1, Ordering::Relaxed) + 1;
                    reporter.on_hash_progress(done, total);
                    match result {
                        Ok(digest) => Ok(candidate.into_entry(Some(digest))),
                        Err(err) => Err((candidate.path, err)),
                    }
                })
                .collect()
        });
        cancel.check("scan completion")?;

        let mut entries = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(entry) => entries.push(entry),
                Err((_, err)) if err.is_fatal() => return Err(err),
                Err((path, err)) => {
                    warn!("Skipping {}: {}", path.display(), err);
                    skipped.push(SkippedFile::from_error(&path, &err));
                }
            }
        }
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        let hash_secs = hash_start.elapsed().as_secs_f64();
        reporter.on_hash_complete(entries.len(), skipped.len(), hash_secs);
        debug!(
            "Scanned {} in {:.2}s: {} files, {} skipped",
            root_display,
            walk_start.elapsed().as_secs_f64(),
            entries.len(),
            skipped.len(),
        );

        Ok(ScanOutcome {
            root: self.root.to_path_buf(),
            entries,
            skipped,
        })
    }
}
