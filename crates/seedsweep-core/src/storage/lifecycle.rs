use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use super::models::*;
use super::sqlite::Database;
use crate::error::Error;
use crate::reconcile::{Classification, ClassifiedFile};

const TRACKED_COLUMNS: &str = "tf.id, tf.path, tf.source, tf.status, tf.consecutive_scans, \
     tf.first_seen_at, tf.last_seen_at, tf.last_scan_id, tf.include_in_report, tf.size_bytes, \
     tf.content_digest, tf.label, tf.item_id, tf.marked_at, tf.deleted_at";

const RUN_COLUMNS: &str = "sr.id, sr.started_at, sr.finished_at, sr.remote_host, sr.scanned_paths, \
     sr.orphan_count, sr.torrent_count, sr.media_count, sr.mismatch_count, \
     (SELECT COUNT(*) FROM file_scan_history h WHERE h.scan_id = sr.id)";

/// The part of an existing row the state machine needs.
struct PriorState {
    id: i64,
    status: FileStatus,
    consecutive_scans: u32,
    first_seen_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    last_scan_id: Option<i64>,
}

impl Database {
    // ── Scan recording ───────────────────────────────────────────

    /// Apply one run's classification to the lifecycle table.
    ///
    /// Everything (the run row, every tracked row and the history links)
    /// lands in a single transaction: on any error nothing of this run is
    /// visible. `now` for every row is the run's start time.
    pub fn record_scan(
        &self,
        classification: &Classification,
        scan_run: &ScanRun,
        policy: &DeletionPolicy,
    ) -> Result<ScanRecord, Error> {
        let finished_at = scan_run
            .finished_at
            .ok_or_else(|| Error::Other("scan run must be finished before it is recorded".into()))?;
        let now = scan_run.started_at;

        let tx = self.connection().unchecked_transaction()?;

        let previous_scan_id: Option<i64> =
            tx.query_row("SELECT MAX(id) FROM scan_runs", [], |row| row.get(0))?;

        let scanned_paths = serde_json::to_string(&scan_run.paths_scanned)
            .map_err(|e| Error::Other(format!("cannot encode scanned paths: {}", e)))?;
        tx.execute(
            "INSERT INTO scan_runs \
             (remote_host, scanned_paths, started_at, finished_at, \
              orphan_count, torrent_count, media_count, mismatch_count) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                scan_run.remote_host_identity,
                scanned_paths,
                scan_run.started_at,
                finished_at,
                classification.orphans.len() as i64,
                classification.torrents_present.len() as i64,
                classification.media_orphans.len() as i64,
                classification.mismatched.len() as i64,
            ],
        )?;
        let scan_id = tx.last_insert_rowid();

        let mut touched = Vec::with_capacity(classification.file_count());
        let mut newly_marked = Vec::new();
        for file in classification.files() {
            let (file_id, marked) = apply_detection(&tx, file, scan_id, previous_scan_id, now, policy)?;
            tx.prepare_cached(
                "INSERT OR IGNORE INTO file_scan_history (scan_id, file_id, source) \
                 VALUES (?1, ?2, ?3)",
            )?
            .execute(params![scan_id, file_id, file.source])?;
            if marked {
                newly_marked.push(file_id);
            }
            touched.push(file_id);
        }

        let tracked = touched
            .iter()
            .map(|id| select_tracked_by_id(&tx, *id))
            .collect::<Result<Vec<_>, _>>()?;
        tx.commit()?;

        let eligible_for_action: Vec<TrackedFile> = tracked
            .iter()
            .filter(|f| newly_marked.contains(&f.id))
            .cloned()
            .collect();
        info!(
            "Recorded scan {}: {} rows tracked, {} newly marked for deletion",
            scan_id,
            tracked.len(),
            eligible_for_action.len()
        );

        Ok(ScanRecord {
            scan_id,
            eligible_for_action,
            tracked,
        })
    }

    // ── Action outcomes ──────────────────────────────────────────

    /// Record what the external approval workflow did with a marked row.
    pub fn record_action_outcome(
        &self,
        path: &str,
        source: Source,
        outcome: ActionOutcome,
        at: DateTime<Utc>,
    ) -> Result<TrackedFile, Error> {
        let tx = self.connection().unchecked_transaction()?;
        let current = select_tracked(&tx, path, source)?.ok_or_else(|| Error::NotTracked {
            path: path.to_string(),
            category: source,
        })?;

        let target = match outcome {
            ActionOutcome::Removed => FileStatus::Deleted,
            ActionOutcome::Rejected => FileStatus::Active,
        };
        if current.status != FileStatus::MarkedForDeletion {
            return Err(Error::InvalidTransition {
                path: path.to_string(),
                category: source,
                from: current.status,
                to: target,
            });
        }

        match outcome {
            ActionOutcome::Removed => {
                tx.execute(
                    "UPDATE tracked_files SET status = ?1, deleted_at = ?2 WHERE id = ?3",
                    params![FileStatus::Deleted, at, current.id],
                )?;
            }
            // The streak has to be earned again before the row is re-marked.
            ActionOutcome::Rejected => {
                tx.execute(
                    "UPDATE tracked_files SET status = ?1, marked_at = NULL, consecutive_scans = 1 \
                     WHERE id = ?2",
                    params![FileStatus::Active, current.id],
                )?;
            }
        }
        let updated = select_tracked_by_id(&tx, current.id)?;
        tx.commit()?;

        info!("{} ({}) is now {}", path, source, updated.status);
        Ok(updated)
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn tracked_file(&self, path: &str, source: Source) -> Result<Option<TrackedFile>, Error> {
        Ok(select_tracked(self.connection(), path, source)?)
    }

    /// Tracked rows, optionally filtered by source and/or status, by path.
    pub fn tracked_files(
        &self,
        source: Option<Source>,
        status: Option<FileStatus>,
    ) -> Result<Vec<TrackedFile>, Error> {
        let mut stmt = self.connection().prepare_cached(&format!(
            "SELECT {} FROM tracked_files tf \
             WHERE (?1 IS NULL OR tf.source = ?1) AND (?2 IS NULL OR tf.status = ?2) \
             ORDER BY tf.path, tf.source",
            TRACKED_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![source, status], tracked_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Marked rows that the latest committed run still saw as orphans. These
    /// are the only rows safe to act on.
    pub fn files_marked_for_deletion(&self) -> Result<Vec<TrackedFile>, Error> {
        self.marked_files(true)
    }

    /// Marked rows the latest run did not see as orphans, e.g. because the
    /// daemon seeds the path again or the file is gone. Listed for review only.
    pub fn stale_marked_files(&self) -> Result<Vec<TrackedFile>, Error> {
        self.marked_files(false)
    }

    fn marked_files(&self, seen_in_latest_run: bool) -> Result<Vec<TrackedFile>, Error> {
        let mut stmt = self.connection().prepare_cached(&format!(
            "SELECT {} FROM tracked_files tf \
             WHERE tf.status = ?1 \
               AND (tf.last_scan_id IS (SELECT MAX(id) FROM scan_runs)) = ?2 \
             ORDER BY tf.path, tf.source",
            TRACKED_COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![FileStatus::MarkedForDeletion, seen_in_latest_run],
                tracked_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// The latest committed run and the reportable rows it touched, largest
    /// first. `None` before the first run.
    pub fn latest_scan_report(&self) -> Result<Option<(ScanRunSummary, Vec<TrackedFile>)>, Error> {
        let Some(run) = self.list_scan_runs(1)?.into_iter().next() else {
            return Ok(None);
        };

        let mut stmt = self.connection().prepare_cached(&format!(
            "SELECT {} FROM tracked_files tf \
             JOIN file_scan_history h ON h.file_id = tf.id \
             WHERE h.scan_id = ?1 AND tf.include_in_report = 1 \
             ORDER BY tf.source, tf.size_bytes DESC, tf.path",
            TRACKED_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![run.id], tracked_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Some((run, rows)))
    }

    /// Committed runs, newest first.
    pub fn list_scan_runs(&self, limit: usize) -> Result<Vec<ScanRunSummary>, Error> {
        let mut stmt = self.connection().prepare_cached(&format!(
            "SELECT {} FROM scan_runs sr ORDER BY sr.id DESC LIMIT ?1",
            RUN_COLUMNS
        ))?;
        let runs = stmt
            .query_map(params![limit as i64], |row| {
                let paths: String = row.get(4)?;
                Ok(ScanRunSummary {
                    id: row.get(0)?,
                    started_at: row.get(1)?,
                    finished_at: row.get(2)?,
                    remote_host_identity: row.get(3)?,
                    paths_scanned: serde_json::from_str(&paths).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e))
                    })?,
                    orphan_count: row.get(5)?,
                    torrent_count: row.get(6)?,
                    media_count: row.get(7)?,
                    mismatch_count: row.get(8)?,
                    files_touched: row.get(9)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }
}

/// Insert or advance the row for one detected file. Returns the row id and
/// whether the row crossed into `marked_for_deletion` in this run.
fn apply_detection(
    conn: &Connection,
    file: &ClassifiedFile,
    scan_id: i64,
    previous_scan_id: Option<i64>,
    now: DateTime<Utc>,
    policy: &DeletionPolicy,
) -> rusqlite::Result<(i64, bool)> {
    let prior = conn
        .prepare_cached(
            "SELECT id, status, consecutive_scans, first_seen_at, last_seen_at, last_scan_id \
             FROM tracked_files WHERE path = ?1 AND source = ?2",
        )?
        .query_row(params![file.path, file.source], |row| {
            Ok(PriorState {
                id: row.get(0)?,
                status: row.get(1)?,
                consecutive_scans: row.get(2)?,
                first_seen_at: row.get(3)?,
                last_seen_at: row.get(4)?,
                last_scan_id: row.get(5)?,
            })
        })
        .optional()?;

    let Some(prior) = prior else {
        let marked = is_eligible(file.source, FileStatus::Active, 1, now, now, policy);
        let status = if marked { FileStatus::MarkedForDeletion } else { FileStatus::Active };
        conn.prepare_cached(
            "INSERT INTO tracked_files \
             (path, source, status, consecutive_scans, first_seen_at, last_seen_at, last_scan_id, \
              include_in_report, size_bytes, content_digest, label, item_id, marked_at) \
             VALUES (?1, ?2, ?3, 1, ?4, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?
        .execute(params![
            file.path,
            file.source,
            status,
            now,
            scan_id,
            file.include_in_report,
            file.size_bytes as i64,
            file.content_digest,
            file.label,
            file.item_id,
            marked.then_some(now),
        ])?;
        return Ok((conn.last_insert_rowid(), marked));
    };

    // Only a detection in the run right after the previous one extends the
    // streak; after a gap it starts over.
    let consecutive_scans = if prior.last_scan_id.is_some() && prior.last_scan_id == previous_scan_id {
        prior.consecutive_scans + 1
    } else {
        1
    };
    let last_seen_at = prior.last_seen_at.max(now);

    let marked = is_eligible(
        file.source,
        prior.status,
        consecutive_scans,
        prior.first_seen_at,
        now,
        policy,
    );
    let status = if marked { FileStatus::MarkedForDeletion } else { prior.status };
    if prior.status.is_terminal() {
        warn!(
            "{} ({}) was recorded as deleted but is still present",
            file.path, file.source
        );
    }

    conn.prepare_cached(
        "UPDATE tracked_files SET \
             status = ?1, consecutive_scans = ?2, last_seen_at = ?3, last_scan_id = ?4, \
             include_in_report = ?5, size_bytes = ?6, content_digest = ?7, label = ?8, \
             item_id = ?9, marked_at = COALESCE(?10, marked_at) \
         WHERE id = ?11",
    )?
    .execute(params![
        status,
        consecutive_scans,
        last_seen_at,
        scan_id,
        file.include_in_report,
        file.size_bytes as i64,
        file.content_digest,
        file.label,
        file.item_id,
        marked.then_some(now),
        prior.id,
    ])?;

    if marked {
        debug!(
            "Marking {} for deletion after {} consecutive scans",
            file.path, consecutive_scans
        );
    }
    Ok((prior.id, marked))
}

fn is_eligible(
    source: Source,
    status: FileStatus,
    consecutive_scans: u32,
    first_seen_at: DateTime<Utc>,
    now: DateTime<Utc>,
    policy: &DeletionPolicy,
) -> bool {
    source == Source::LocalTorrentFolder
        && status == FileStatus::Active
        && policy.allows(consecutive_scans, first_seen_at, now)
}

fn select_tracked(conn: &Connection, path: &str, source: Source) -> rusqlite::Result<Option<TrackedFile>> {
    conn.prepare_cached(&format!(
        "SELECT {} FROM tracked_files tf WHERE tf.path = ?1 AND tf.source = ?2",
        TRACKED_COLUMNS
    ))?
    .query_row(params![path, source], tracked_from_row)
    .optional()
}

fn select_tracked_by_id(conn: &Connection, id: i64) -> rusqlite::Result<TrackedFile> {
    conn.prepare_cached(&format!(
        "SELECT {} FROM tracked_files tf WHERE tf.id = ?1",
        TRACKED_COLUMNS
    ))?
    .query_row(params![id], tracked_from_row)
}

fn tracked_from_row(row: &Row<'_>) -> rusqlite::Result<TrackedFile> {
    Ok(TrackedFile {
        id: row.get(0)?,
        path: row.get(1)?,
        source: row.get(2)?,
        status: row.get(3)?,
        consecutive_scans: row.get(4)?,
        first_seen_at: row.get(5)?,
        last_seen_at: row.get(6)?,
        last_scan_id: row.get(7)?,
        include_in_report: row.get(8)?,
        size_bytes: row.get::<_, i64>(9)? as u64,
        content_digest: row.get(10)?,
        label: row.get(11)?,
        item_id: row.get(12)?,
        marked_at: row.get(13)?,
        deleted_at: row.get(14)?,
    })
}
