use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tempfile::tempdir;

use seedsweep_core::hasher::{hash_data, HashCache};
use seedsweep_core::scanner::{walk, FolderScanner, ScanFilter};
use seedsweep_core::{CancelToken, Error, SilentReporter};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn write(root: &Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Layout:
///   tv/Show/e01.mkv
///   tv/Show/e01.nfo          (extension blacklist)
///   tv/Show/Sample/s.mkv     (skip pattern)
///   music/album/track.flac   (top-level blacklist)
///   movies/Film/film.mkv
///   movies/Film/tiny.mkv     (below min size)
fn create_tree(root: &Path) {
    write(root, "tv/Show/e01.mkv", &[1u8; 64]);
    write(root, "tv/Show/e01.nfo", &[2u8; 64]);
    write(root, "tv/Show/Sample/s.mkv", &[3u8; 64]);
    write(root, "music/album/track.flac", &[4u8; 64]);
    write(root, "movies/Film/film.mkv", &[5u8; 64]);
    write(root, "movies/Film/tiny.mkv", &[6u8; 4]);
}

fn filter() -> ScanFilter {
    ScanFilter::new(&strings(&[".nfo"]), &strings(&["music"]))
        .with_skip_patterns(&strings(&["*/sample*"]))
        .with_min_file_size(16)
}

fn relative_paths(root: &Path, filter: &ScanFilter) -> BTreeSet<String> {
    walk(root, filter)
        .map(|c| c.unwrap().relative_path)
        .collect()
}

#[test]
fn test_walk_applies_filters() {
    let tmp = tempdir().unwrap();
    create_tree(tmp.path());

    let found = relative_paths(tmp.path(), &filter());

    let expected: BTreeSet<String> = ["movies/Film/film.mkv", "tv/Show/e01.mkv"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(found, expected);
}

#[test]
fn test_walk_is_restartable() {
    let tmp = tempdir().unwrap();
    create_tree(tmp.path());
    let filter = filter();

    assert_eq!(relative_paths(tmp.path(), &filter), relative_paths(tmp.path(), &filter));
}

#[test]
fn test_scan_hashes_and_sorts_entries() {
    let tmp = tempdir().unwrap();
    create_tree(tmp.path());
    let cache = HashCache::open_in_memory().unwrap();
    let filter = filter();

    let outcome = FolderScanner::new(tmp.path(), &filter, &cache)
        .with_threads(2)
        .scan(&SilentReporter, &CancelToken::new())
        .unwrap();

    let paths: Vec<&str> = outcome.entries.iter().map(|e| e.relative_path.as_str()).collect();
    assert_eq!(paths, vec!["movies/Film/film.mkv", "tv/Show/e01.mkv"]);
    assert_eq!(outcome.entries[1].content_digest, Some(hash_data(&[1u8; 64])));
    assert_eq!(outcome.total_bytes(), 128);
    assert!(outcome.skipped.is_empty());
    assert_eq!(cache.len().unwrap(), 2);
}

#[test]
fn test_lazy_entries_match_parallel_scan() {
    let tmp = tempdir().unwrap();
    create_tree(tmp.path());
    let cache = HashCache::open_in_memory().unwrap();
    let filter = filter();
    let scanner = FolderScanner::new(tmp.path(), &filter, &cache);

    let mut lazy: Vec<_> = scanner.entries().map(|e| e.unwrap()).collect();
    lazy.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    let parallel = scanner.scan(&SilentReporter, &CancelToken::new()).unwrap();

    assert_eq!(lazy, parallel.entries);
}

#[test]
fn test_scan_of_missing_root_fails() {
    let tmp = tempdir().unwrap();
    let cache = HashCache::open_in_memory().unwrap();
    let filter = ScanFilter::default();

    let result = FolderScanner::new(&tmp.path().join("nope"), &filter, &cache)
        .scan(&SilentReporter, &CancelToken::new());

    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_cancelled_scan_stops() {
    let tmp = tempdir().unwrap();
    create_tree(tmp.path());
    let cache = HashCache::open_in_memory().unwrap();
    let filter = filter();
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = FolderScanner::new(tmp.path(), &filter, &cache).scan(&SilentReporter, &cancel);

    assert!(matches!(result, Err(Error::Cancelled { .. })));
    assert!(cache.is_empty().unwrap());
}

#[cfg(unix)]
#[test]
fn test_symlink_loop_terminates() {
    use std::os::unix::fs::symlink;

    let tmp = tempdir().unwrap();
    write(tmp.path(), "tv/Show/e01.mkv", &[1u8; 64]);
    symlink(tmp.path().join("tv"), tmp.path().join("tv/Show/back-to-tv")).unwrap();
    symlink(tmp.path(), tmp.path().join("tv/root-loop")).unwrap();

    let found = relative_paths(tmp.path(), &ScanFilter::default());

    assert_eq!(found.len(), 1);
    assert!(found.contains("tv/Show/e01.mkv"));
}

#[cfg(unix)]
#[test]
fn test_aliased_directory_is_walked_once() {
    use std::os::unix::fs::symlink;

    let tmp = tempdir().unwrap();
    write(tmp.path(), "movies/Film/film.mkv", &[5u8; 64]);
    symlink(tmp.path().join("movies/Film"), tmp.path().join("alias")).unwrap();

    let filter = ScanFilter::default();
    let first: Vec<String> = walk(tmp.path(), &filter).map(|c| c.unwrap().relative_path).collect();
    let second: Vec<String> = walk(tmp.path(), &filter).map(|c| c.unwrap().relative_path).collect();

    // "alias" sorts before "movies", so the link is the path that is kept.
    assert_eq!(first, vec!["alias/film.mkv".to_string()]);
    assert_eq!(first, second);
}

#[cfg(unix)]
#[test]
fn test_dangling_symlink_is_skipped_not_fatal() {
    use std::os::unix::fs::symlink;

    let tmp = tempdir().unwrap();
    write(tmp.path(), "tv/e01.mkv", &[1u8; 64]);
    symlink(tmp.path().join("does-not-exist"), tmp.path().join("tv/broken.mkv")).unwrap();
    let cache = HashCache::open_in_memory().unwrap();
    let filter = ScanFilter::default();

    let outcome = FolderScanner::new(tmp.path(), &filter, &cache)
        .scan(&SilentReporter, &CancelToken::new())
        .unwrap();

    assert_eq!(outcome.entries.len(), 1);
    assert_eq!(outcome.skipped.len(), 1);
    assert!(outcome.skipped[0].path.ends_with("broken.mkv"));
}
