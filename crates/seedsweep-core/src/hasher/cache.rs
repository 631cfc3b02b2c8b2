use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, trace};

use super::xxhash;
use crate::cancel::CancelToken;
use crate::error::Error;
use crate::storage::sqlite;

/// Persistent `(path, size, mtime) -> digest` cache.
///
/// Entries live in the `file_hashes` table of the run database. Reads and
/// writes for one key are serialized through a per-path lock, so parallel
/// hashing workers never race on the same entry; different keys proceed
/// independently and only share the connection for the short lookup/upsert.
pub struct HashCache {
    conn: Mutex<Connection>,
    key_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl HashCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = sqlite::open_connection(path.as_ref())?;
        debug!("Using '{}' for hash cache", path.as_ref().display());
        Ok(Self::with_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()?;
        sqlite::configure(&conn)?;
        Ok(Self::with_connection(conn))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            key_locks: DashMap::new(),
        }
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.conn
            .lock()
            .map_err(|e| Error::Cache(format!("Failed to lock cache: {}", e)))
    }

    /// Cached digest when `(path, size, mtime)` matches exactly, otherwise
    /// hash the file, store the entry and return the fresh digest.
    pub fn get_or_compute(&self, path: &Path, size: u64, mtime_ns: i64) -> Result<String, Error> {
        self.get_or_compute_with(path, size, mtime_ns, &CancelToken::new())
    }

    pub fn get_or_compute_with(
        &self,
        path: &Path,
        size: u64,
        mtime_ns: i64,
        cancel: &CancelToken,
    ) -> Result<String, Error> {
        let key = cache_key(path);
        let lock = self.key_locks.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock
                .lock()
                .map_err(|e| Error::Cache(format!("Failed to lock cache key: {}", e)))?;
            self.lookup_or_hash(&key, path, size, mtime_ns, cancel)
        };
        drop(lock);
        self.key_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    fn lookup_or_hash(
        &self,
        key: &str,
        path: &Path,
        size: u64,
        mtime_ns: i64,
        cancel: &CancelToken,
    ) -> Result<String, Error> {
        if let Some(digest) = self.lookup_key(key, size, mtime_ns)? {
            trace!("Found hash for {} in cache", path.display());
            return Ok(digest);
        }

        let digest = xxhash::hash_file(path, cancel)?;
        trace!("No hash found for {} in cache, adding", path.display());
        self.connection()?.execute(
            "INSERT INTO file_hashes (path, file_size, mtime_ns, content_digest, hashed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(path) DO UPDATE SET \
                 file_size = excluded.file_size, \
                 mtime_ns = excluded.mtime_ns, \
                 content_digest = excluded.content_digest, \
                 hashed_at = excluded.hashed_at",
            params![key, size as i64, mtime_ns, digest, Utc::now()],
        )?;
        Ok(digest)
    }

    /// Cached digest for an exact `(path, size, mtime)` match, without hashing.
    pub fn lookup(&self, path: &Path, size: u64, mtime_ns: i64) -> Result<Option<String>, Error> {
        self.lookup_key(&cache_key(path), size, mtime_ns)
    }

    fn lookup_key(&self, key: &str, size: u64, mtime_ns: i64) -> Result<Option<String>, Error> {
        let digest = self
            .connection()?
            .query_row(
                "SELECT content_digest FROM file_hashes \
                 WHERE path = ?1 AND file_size = ?2 AND mtime_ns = ?3",
                params![key, size as i64, mtime_ns],
                |row| row.get(0),
            )
            .optional()?;
        Ok(digest)
    }

    /// Remove every entry whose path is not in `existing_paths`.
    pub fn prune(&self, existing_paths: &HashSet<String>) -> Result<usize, Error> {
        self.prune_matching(existing_paths, |_| true)
    }

    /// Like [`HashCache::prune`], restricted to entries located under `root`.
    pub fn prune_under(&self, root: &Path, existing_paths: &HashSet<String>) -> Result<usize, Error> {
        let prefix = cache_key(root);
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        self.prune_matching(existing_paths, |path| path.starts_with(&prefix))
    }

    fn prune_matching(
        &self,
        existing_paths: &HashSet<String>,
        in_scope: impl Fn(&str) -> bool,
    ) -> Result<usize, Error> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let stale: Vec<String> = {
            let mut stmt = tx.prepare("SELECT path FROM file_hashes")?;
            let paths = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            paths
                .into_iter()
                .filter(|p| in_scope(p) && !existing_paths.contains(p))
                .collect()
        };
        {
            let mut delete = tx.prepare_cached("DELETE FROM file_hashes WHERE path = ?1")?;
            for path in &stale {
                delete.execute(params![path])?;
            }
        }
        tx.commit()?;
        info!("Removed {} stale entries from hash cache", stale.len());
        Ok(stale.len())
    }

    pub fn len(&self) -> Result<usize, Error> {
        let count: i64 =
            self.connection()?
                .query_row("SELECT COUNT(*) FROM file_hashes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&self) -> Result<(), Error> {
        self.connection()?.execute("DELETE FROM file_hashes", [])?;
        info!("Hash cache cleared");
        Ok(())
    }
}

/// Cache key for a file: its absolute path as lossy UTF-8 with `/` separators.
pub fn cache_key(path: &Path) -> String {
    let key = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        key.into_owned()
    } else {
        key.replace(std::path::MAIN_SEPARATOR, "/")
    }
}
