use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("unknown {kind} '{value}'")]
pub struct ParseKindError {
    kind: &'static str,
    value: String,
}

/// Which classification category a tracked row belongs to. Part of the row key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    LocalTorrentFolder,
    Torrents,
    Media,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::LocalTorrentFolder, Source::Torrents, Source::Media];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::LocalTorrentFolder => "local_torrent_folder",
            Source::Torrents => "torrents",
            Source::Media => "media",
        }
    }
}

/// `active -> marked_for_deletion -> deleted`; `deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Active,
    MarkedForDeletion,
    Deleted,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Active => "active",
            FileStatus::MarkedForDeletion => "marked_for_deletion",
            FileStatus::Deleted => "deleted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Deleted)
    }
}

macro_rules! sql_text_enum {
    ($ty:ty, $kind:literal, [$($variant:expr),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseKindError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| ParseKindError {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

sql_text_enum!(Source, "source", [Source::LocalTorrentFolder, Source::Torrents, Source::Media]);
sql_text_enum!(
    FileStatus,
    "status",
    [FileStatus::Active, FileStatus::MarkedForDeletion, FileStatus::Deleted]
);

/// The durable lifecycle record for one `(path, source)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedFile {
    pub id: i64,
    pub path: String,
    pub source: Source,
    pub status: FileStatus,
    pub consecutive_scans: u32,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub last_scan_id: Option<i64>,
    pub include_in_report: bool,
    pub size_bytes: u64,
    pub content_digest: Option<String>,
    pub label: Option<String>,
    pub item_id: Option<String>,
    pub marked_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Metadata of one orchestration pass. Finalized once by [`ScanRun::finish`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub remote_host_identity: String,
    pub paths_scanned: Vec<String>,
}

impl ScanRun {
    pub fn begin(remote_host_identity: impl Into<String>, paths_scanned: Vec<String>) -> Self {
        Self::begin_at(Utc::now(), remote_host_identity, paths_scanned)
    }

    pub fn begin_at(
        started_at: DateTime<Utc>,
        remote_host_identity: impl Into<String>,
        paths_scanned: Vec<String>,
    ) -> Self {
        Self {
            started_at,
            finished_at: None,
            remote_host_identity: remote_host_identity.into(),
            paths_scanned,
        }
    }

    /// Stamp the end time. A run that is already finished keeps its stamp.
    pub fn finish(&mut self) {
        if self.finished_at.is_none() {
            self.finished_at = Some(Utc::now().max(self.started_at));
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// A committed run as listed by `history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRunSummary {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub remote_host_identity: String,
    pub paths_scanned: Vec<String>,
    pub orphan_count: i64,
    pub torrent_count: i64,
    pub media_count: i64,
    pub mismatch_count: i64,
    pub files_touched: i64,
}

/// Both conditions must hold before a row may be marked for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionPolicy {
    pub consecutive_scans: u32,
    pub min_age: Duration,
}

impl DeletionPolicy {
    pub fn new(consecutive_scans: u32, min_age_days: i64) -> Self {
        Self {
            consecutive_scans,
            min_age: Duration::days(min_age_days),
        }
    }

    pub fn allows(&self, consecutive_scans: u32, first_seen_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        consecutive_scans >= self.consecutive_scans && now - first_seen_at >= self.min_age
    }
}

impl Default for DeletionPolicy {
    fn default() -> Self {
        Self::new(7, 7)
    }
}

/// Outcome reported back by whoever acted on a marked row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The file was removed; the row becomes `deleted`.
    Removed,
    /// The removal was declined; the row goes back to `active`.
    Rejected,
}

/// What one `record_scan` committed.
#[derive(Debug, Clone, Serialize)]
pub struct ScanRecord {
    pub scan_id: i64,
    /// Rows that crossed into `marked_for_deletion` in this run.
    pub eligible_for_action: Vec<TrackedFile>,
    /// Snapshot of every row touched by this run, after the update.
    pub tracked: Vec<TrackedFile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_text() {
        for source in Source::ALL {
            assert_eq!(source.as_str().parse::<Source>().unwrap(), source);
        }
        assert_eq!(
            "marked_for_deletion".parse::<FileStatus>().unwrap(),
            FileStatus::MarkedForDeletion
        );
        assert!("orphans".parse::<Source>().is_err());
    }

    #[test]
    fn test_policy_needs_both_conditions() {
        let policy = DeletionPolicy::default();
        let now = Utc::now();
        let old = now - Duration::days(8);
        let recent = now - Duration::days(2);

        assert!(policy.allows(7, old, now));
        assert!(!policy.allows(6, old, now));
        assert!(!policy.allows(9, recent, now));
    }
}
