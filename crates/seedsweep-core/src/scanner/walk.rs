use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{trace, warn};
use walkdir::{DirEntry, WalkDir};

use super::filter::ScanFilter;
use crate::error::Error;
use crate::hasher::mtime_nanos;
use crate::paths;

/// A file that passed the filters, before hashing.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub relative_path: String,
    pub size_bytes: u64,
    pub modification_time: i64,
}

#[cfg(unix)]
type DirKey = (u64, u64);
#[cfg(not(unix))]
type DirKey = PathBuf;

#[cfg(unix)]
fn dir_key(entry: &DirEntry) -> Option<DirKey> {
    use std::os::unix::fs::MetadataExt;
    let metadata = entry.metadata().ok()?;
    Some((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn dir_key(entry: &DirEntry) -> Option<DirKey> {
    std::fs::canonicalize(entry.path()).ok()
}

/// Lazily enumerate the files under `root` that pass `filter`.
///
/// Symlinks are followed. Each directory identity is entered at most once, so
/// link cycles and links aliasing an already visited directory cannot make the
/// walk revisit a subtree. Unreadable entries come out as `Err` items; the
/// walk itself keeps going. Entries come out in file name order, so the same
/// tree always yields the same sequence.
pub fn walk<'a>(
    root: &'a Path,
    filter: &'a ScanFilter,
) -> impl Iterator<Item = Result<Candidate, Error>> + 'a {
    let mut visited: HashSet<DirKey> = HashSet::new();

    WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| admit(entry, filter, &mut visited))
        .filter_map(move |entry| match entry {
            Ok(entry) => candidate(root, filter, &entry),
            Err(err) => walk_error(root, err),
        })
}

fn admit(entry: &DirEntry, filter: &ScanFilter, visited: &mut HashSet<DirKey>) -> bool {
    if !entry.file_type().is_dir() {
        return true;
    }

    if entry.depth() == 1 && filter.skips_subfolder(&entry.file_name().to_string_lossy()) {
        trace!("Skipping blacklisted directory {}", entry.path().display());
        return false;
    }

    match dir_key(entry) {
        Some(key) => {
            if visited.insert(key) {
                true
            } else {
                warn!(
                    "Skipping {}: directory already visited through another path",
                    entry.path().display()
                );
                false
            }
        }
        // Unidentifiable directories are still walked; walkdir's own
        // ancestor check keeps true cycles finite.
        None => true,
    }
}

fn candidate(root: &Path, filter: &ScanFilter, entry: &DirEntry) -> Option<Result<Candidate, Error>> {
    if entry.file_type().is_dir() {
        return None;
    }

    let metadata = match entry.metadata() {
        Ok(m) => m,
        Err(err) => return Some(Err(Error::file_access(entry.path(), io::Error::from(err)))),
    };
    if !metadata.is_file() {
        return None;
    }

    let relative_path = paths::local_relative(root, entry.path())?;
    let size_bytes = metadata.len();
    if filter.skips_file(&relative_path, size_bytes) {
        return None;
    }

    let modification_time = match mtime_nanos(&metadata) {
        Ok(t) => t,
        Err(err) => return Some(Err(Error::file_access(entry.path(), err))),
    };

    Some(Ok(Candidate {
        path: entry.path().to_path_buf(),
        relative_path,
        size_bytes,
        modification_time,
    }))
}

fn walk_error(root: &Path, err: walkdir::Error) -> Option<Result<Candidate, Error>> {
    let path = err
        .path()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.to_path_buf());

    if let Some(ancestor) = err.loop_ancestor() {
        warn!(
            "Skipping {}: symlink loop back to {}",
            path.display(),
            ancestor.display()
        );
        return None;
    }

    Some(Err(Error::file_access(path, io::Error::from(err))))
}
