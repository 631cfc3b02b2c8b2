use std::fs;
use std::path::Path;

use tempfile::{tempdir, TempDir};

use seedsweep_core::remote::{InventorySource, RemoteFile, RemoteInventory, RemoteItem};
use seedsweep_core::storage::{Database, FileStatus, Source};
use seedsweep_core::{AppConfig, CancelToken, Error, ScanEngine, SilentReporter};

/// Daemon stand-in serving a fixed inventory.
struct StaticInventory {
    inventory: RemoteInventory,
    cancel_on_fetch: Option<CancelToken>,
}

impl InventorySource for StaticInventory {
    fn host_identity(&self) -> String {
        self.inventory.host_identity.clone()
    }

    fn fetch_all(&self) -> Result<RemoteInventory, Error> {
        if let Some(token) = &self.cancel_on_fetch {
            token.cancel();
        }
        Ok(self.inventory.clone())
    }
}

struct UnreachableDaemon;

impl InventorySource for UnreachableDaemon {
    fn host_identity(&self) -> String {
        "admin@seedbox:8112".to_string()
    }

    fn fetch_all(&self) -> Result<RemoteInventory, Error> {
        Err(Error::RemoteUnavailable("connection refused".into()))
    }
}

struct Fixture {
    _tmp: TempDir,
    torrents: std::path::PathBuf,
    media: std::path::PathBuf,
    db_path: String,
}

fn write(root: &Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Layout:
///   torrents/tv/show.720p.mkv    (no item references it)
///   torrents/tv/show.1080p.mkv   (item t1)
///   torrents/tv/show.1080p.nfo   (blacklisted)
///   media/tv/show.1080p.mkv      (library copy of the 1080p file)
///   media/movies/old.mkv         (item long gone)
fn fixture() -> Fixture {
    let tmp = tempdir().unwrap();
    let torrents = tmp.path().join("torrents");
    let media = tmp.path().join("media");
    write(&torrents, "tv/show.720p.mkv", &[1u8; 4096]);
    write(&torrents, "tv/show.1080p.mkv", &[2u8; 8192]);
    write(&torrents, "tv/show.1080p.nfo", b"info");
    write(&media, "tv/show.1080p.mkv", &[2u8; 8192]);
    write(&media, "movies/old.mkv", &[3u8; 2048]);
    let db_path = tmp.path().join("seedsweep.db").to_string_lossy().into_owned();
    Fixture {
        _tmp: tmp,
        torrents,
        media,
        db_path,
    }
}

fn config(fixture: &Fixture) -> AppConfig {
    AppConfig {
        deluge_host: "seedbox".into(),
        deluge_username: "admin".into(),
        deluge_torrent_base_remote_folder: "/downloads".into(),
        local_torrent_base_local_folder: fixture.torrents.to_string_lossy().into_owned(),
        local_media_base_local_folder: fixture.media.to_string_lossy().into_owned(),
        sqlite_cache_path: fixture.db_path.clone(),
        min_file_size_mb: 0,
        hash_threads: 2,
        ..AppConfig::default()
    }
}

fn daemon() -> StaticInventory {
    let mut inventory = RemoteInventory::new("admin@seedbox:8112");
    inventory.insert(RemoteItem {
        item_id: "t1".into(),
        name: "show.1080p".into(),
        label: Some("tv".into()),
        state: "Seeding".into(),
        files: vec![RemoteFile {
            path: "tv/show.1080p.mkv".into(),
            size_bytes: 8192,
        }],
    });
    StaticInventory {
        inventory,
        cancel_on_fetch: None,
    }
}

#[test]
fn test_full_run_classifies_and_records() {
    let fixture = fixture();
    let engine = ScanEngine::new(config(&fixture));

    let report = engine
        .run(&daemon(), &SilentReporter, &CancelToken::new())
        .unwrap();

    let c = &report.classification;
    assert_eq!(c.orphans.len(), 1);
    assert_eq!(c.orphans[0].path, "tv/show.720p.mkv");
    assert_eq!(c.torrents_present.len(), 1);
    assert_eq!(c.torrents_present[0].item_id.as_deref(), Some("t1"));
    assert_eq!(c.media_orphans.len(), 1);
    assert_eq!(c.media_orphans[0].path, "movies/old.mkv");
    assert!(c.mismatched.is_empty());
    assert!(report.run.is_finished());
    assert_eq!(report.run.paths_scanned.len(), 2);
    assert_eq!(report.tracked.len(), 3);
    assert!(report.eligible_for_action.is_empty());

    let db = Database::open(&fixture.db_path).unwrap();
    let row = db
        .tracked_file("tv/show.720p.mkv", Source::LocalTorrentFolder)
        .unwrap()
        .unwrap();
    assert_eq!(row.status, FileStatus::Active);
    assert_eq!(row.consecutive_scans, 1);
    assert_eq!(row.last_scan_id, Some(report.scan_id));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["classification"]["orphans"][0]["source"], "local_torrent_folder");
}

#[test]
fn test_repeated_run_is_idempotent_and_advances_counts() {
    let fixture = fixture();
    let engine = ScanEngine::new(config(&fixture));
    let daemon = daemon();

    let first = engine.run(&daemon, &SilentReporter, &CancelToken::new()).unwrap();
    let second = engine.run(&daemon, &SilentReporter, &CancelToken::new()).unwrap();

    assert_eq!(first.classification, second.classification);
    assert_eq!(second.scan_id, first.scan_id + 1);
    assert!(second.tracked.iter().all(|row| row.consecutive_scans == 2));
    assert_eq!(engine.count_hash_cache().unwrap(), 4);
}

#[test]
fn test_unreachable_daemon_leaves_store_untouched() {
    let fixture = fixture();
    let engine = ScanEngine::new(config(&fixture));

    let err = engine
        .run(&UnreachableDaemon, &SilentReporter, &CancelToken::new())
        .unwrap_err();

    assert!(matches!(err, Error::RemoteUnavailable(_)));
    let db = Database::open(&fixture.db_path).unwrap();
    assert!(db.list_scan_runs(10).unwrap().is_empty());
    assert!(db.tracked_files(None, None).unwrap().is_empty());
}

#[test]
fn test_cancel_during_fetch_stops_before_scanning() {
    let fixture = fixture();
    let engine = ScanEngine::new(config(&fixture));
    let cancel = CancelToken::new();
    let daemon = StaticInventory {
        cancel_on_fetch: Some(cancel.clone()),
        ..daemon()
    };

    let err = engine.run(&daemon, &SilentReporter, &cancel).unwrap_err();

    assert!(matches!(err, Error::Cancelled { stage: "torrent folder scan" }));
    assert_eq!(engine.count_hash_cache().unwrap(), 0);
    let db = Database::open(&fixture.db_path).unwrap();
    assert!(db.list_scan_runs(10).unwrap().is_empty());
}

#[test]
fn test_skip_media_check() {
    let fixture = fixture();
    let mut config = config(&fixture);
    config.skip_media_check = true;
    let engine = ScanEngine::new(config);

    let report = engine.run(&daemon(), &SilentReporter, &CancelToken::new()).unwrap();

    assert!(!report.classification.media_scanned);
    assert!(report.classification.media_orphans.is_empty());
    assert_eq!(report.run.paths_scanned.len(), 1);
    assert_eq!(report.tracked.len(), 2);
}

#[test]
fn test_prune_hash_cache_drops_vanished_files() {
    let fixture = fixture();
    let engine = ScanEngine::new(config(&fixture));
    engine.run(&daemon(), &SilentReporter, &CancelToken::new()).unwrap();
    assert_eq!(engine.count_hash_cache().unwrap(), 4);

    fs::remove_file(fixture.torrents.join("tv/show.720p.mkv")).unwrap();
    fs::remove_file(fixture.media.join("movies/old.mkv")).unwrap();

    assert_eq!(engine.prune_hash_cache().unwrap(), 2);
    assert_eq!(engine.count_hash_cache().unwrap(), 2);
}
