use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::thread;

use tempfile::tempdir;

use seedsweep_core::hasher::cache::cache_key;
use seedsweep_core::hasher::{hash_data, mtime_nanos, HashCache};
use seedsweep_core::{CancelToken, Error};

fn stat(path: &Path) -> (u64, i64) {
    let metadata = fs::metadata(path).unwrap();
    (metadata.len(), mtime_nanos(&metadata).unwrap())
}

#[test]
fn test_miss_then_hit() {
    let tmp = tempdir().unwrap();
    let file = tmp.path().join("a.mkv");
    fs::write(&file, b"some video bytes").unwrap();
    let (size, mtime) = stat(&file);

    let cache = HashCache::open_in_memory().unwrap();
    assert!(cache.lookup(&file, size, mtime).unwrap().is_none());

    let digest = cache.get_or_compute(&file, size, mtime).unwrap();
    assert_eq!(digest, hash_data(b"some video bytes"));
    assert_eq!(digest.len(), 16);
    assert_eq!(cache.len().unwrap(), 1);

    // A hit never touches the file.
    fs::remove_file(&file).unwrap();
    assert_eq!(cache.get_or_compute(&file, size, mtime).unwrap(), digest);
}

#[test]
fn test_changed_size_or_mtime_forces_rehash() {
    let tmp = tempdir().unwrap();
    let file = tmp.path().join("a.mkv");
    fs::write(&file, b"first").unwrap();
    let (size, mtime) = stat(&file);

    let cache = HashCache::open_in_memory().unwrap();
    let first = cache.get_or_compute(&file, size, mtime).unwrap();

    fs::write(&file, b"second version").unwrap();
    let (new_size, new_mtime) = stat(&file);
    let second = cache.get_or_compute(&file, new_size, new_mtime).unwrap();

    assert_ne!(first, second);
    assert_eq!(second, hash_data(b"second version"));
    assert_eq!(cache.len().unwrap(), 1);
    assert!(cache.lookup(&file, size, mtime).unwrap().is_none());

    // Same size, different mtime is also a miss.
    let third = cache.get_or_compute(&file, new_size, new_mtime + 1).unwrap();
    assert_eq!(third, second);
    assert!(cache.lookup(&file, new_size, new_mtime).unwrap().is_none());
    assert!(cache.lookup(&file, new_size, new_mtime + 1).unwrap().is_some());
}

#[test]
fn test_unreadable_file_is_not_cached() {
    let tmp = tempdir().unwrap();
    let missing = tmp.path().join("gone.mkv");
    let cache = HashCache::open_in_memory().unwrap();

    let err = cache.get_or_compute(&missing, 10, 0).unwrap_err();

    assert!(matches!(err, Error::FileAccess { .. }));
    assert!(!err.is_fatal());
    assert!(cache.is_empty().unwrap());
}

#[test]
fn test_cancelled_hash_leaves_cache_untouched() {
    let tmp = tempdir().unwrap();
    let file = tmp.path().join("a.mkv");
    fs::write(&file, b"bytes").unwrap();
    let (size, mtime) = stat(&file);

    let cache = HashCache::open_in_memory().unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = cache.get_or_compute_with(&file, size, mtime, &cancel).unwrap_err();
    assert!(matches!(err, Error::Cancelled { .. }));
    assert!(cache.is_empty().unwrap());
}

#[test]
fn test_entries_survive_reopen() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("cache.db");
    let file = tmp.path().join("a.mkv");
    fs::write(&file, b"persisted").unwrap();
    let (size, mtime) = stat(&file);

    let digest = {
        let cache = HashCache::open(&db_path).unwrap();
        cache.get_or_compute(&file, size, mtime).unwrap()
    };

    let cache = HashCache::open(&db_path).unwrap();
    assert_eq!(cache.lookup(&file, size, mtime).unwrap(), Some(digest));
}

#[test]
fn test_concurrent_workers_on_one_key_agree() {
    let tmp = tempdir().unwrap();
    let file = tmp.path().join("shared.mkv");
    fs::write(&file, vec![7u8; 64 * 1024]).unwrap();
    let (size, mtime) = stat(&file);
    let cache = HashCache::open_in_memory().unwrap();

    let digests: Vec<String> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| cache.get_or_compute(&file, size, mtime).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(digests.iter().all(|d| *d == digests[0]));
    assert_eq!(cache.len().unwrap(), 1);
}

#[test]
fn test_prune_and_prune_under() {
    let tmp = tempdir().unwrap();
    let torrents = tmp.path().join("torrents");
    let media = tmp.path().join("media");
    fs::create_dir_all(&torrents).unwrap();
    fs::create_dir_all(&media).unwrap();

    let files = [
        torrents.join("keep.mkv"),
        torrents.join("gone.mkv"),
        media.join("other.mkv"),
    ];
    let cache = HashCache::open_in_memory().unwrap();
    for f in &files {
        fs::write(f, f.to_string_lossy().as_bytes()).unwrap();
        let (size, mtime) = stat(f);
        cache.get_or_compute(f, size, mtime).unwrap();
    }

    let existing: HashSet<String> = [cache_key(&files[0])].into_iter().collect();
    assert_eq!(cache.prune_under(&torrents, &existing).unwrap(), 1);
    assert_eq!(cache.len().unwrap(), 2);

    assert_eq!(cache.prune(&existing).unwrap(), 1);
    assert_eq!(cache.len().unwrap(), 1);

    cache.clear().unwrap();
    assert!(cache.is_empty().unwrap());
}
