//! Three-way classification of the torrent tree, the media tree and the
//! daemon's inventory.
//!
//! Identity across the three inventories is the normalized relative path and
//! nothing else. Content digests only feed [`Mismatch`] detection and the
//! [`ReportRule`].

use std::cmp::Ordering;

use ahash::{AHashMap, AHashSet};
use serde::Serialize;
use tracing::debug;

use crate::remote::RemoteInventory;
use crate::scanner::FileEntry;
use crate::storage::models::Source;

/// One file in one category of a [`Classification`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedFile {
    pub path: String,
    pub source: Source,
    pub size_bytes: u64,
    pub content_digest: Option<String>,
    pub label: Option<String>,
    pub item_id: Option<String>,
    pub include_in_report: bool,
}

/// A path present in both trees whose contents no longer agree, usually a
/// hard link that was broken by a rewrite on one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub path: String,
    pub torrent_digest: String,
    pub media_digest: String,
    pub torrent_size: u64,
    pub media_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// On disk in the torrent tree, unknown to the daemon.
    pub orphans: Vec<ClassifiedFile>,
    /// On disk in the torrent tree and known to the daemon.
    pub torrents_present: Vec<ClassifiedFile>,
    /// In the media tree, unknown to the daemon. Manual review only.
    pub media_orphans: Vec<ClassifiedFile>,
    pub mismatched: Vec<Mismatch>,
    pub media_scanned: bool,
}

impl Classification {
    /// Every classified file, category by category.
    pub fn files(&self) -> impl Iterator<Item = &ClassifiedFile> {
        self.orphans
            .iter()
            .chain(self.torrents_present.iter())
            .chain(self.media_orphans.iter())
    }

    pub fn file_count(&self) -> usize {
        self.orphans.len() + self.torrents_present.len() + self.media_orphans.len()
    }

    pub fn orphan_bytes(&self) -> u64 {
        self.orphans.iter().map(|f| f.size_bytes).sum()
    }
}

/// Decides which `torrents` rows deserve a place in the report.
///
/// The default mirrors the long-standing heuristic: a big file whose item is
/// not already filed under a catch-all label, and which was never copied into
/// the media library, has probably been superseded by a better release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRule {
    pub min_size_bytes: u64,
    pub excluded_label_prefixes: Vec<String>,
    pub require_missing_from_media: bool,
}

impl Default for ReportRule {
    fn default() -> Self {
        Self {
            min_size_bytes: 100_000_000,
            excluded_label_prefixes: vec!["other".to_string(), "soft".to_string()],
            require_missing_from_media: true,
        }
    }
}

impl ReportRule {
    /// `has_media_copy` is `None` when the media tree was not scanned, in
    /// which case the media condition is not applied.
    pub fn includes(&self, size_bytes: u64, label: Option<&str>, has_media_copy: Option<bool>) -> bool {
        if size_bytes <= self.min_size_bytes {
            return false;
        }

        if let Some(label) = label {
            let label = label.to_lowercase();
            if self
                .excluded_label_prefixes
                .iter()
                .any(|prefix| label.starts_with(&prefix.to_lowercase()))
            {
                return false;
            }
        }

        !(self.require_missing_from_media && has_media_copy == Some(true))
    }
}

/// Classify the local torrent tree and (optionally) the media tree against
/// the daemon's inventory.
///
/// `media` is `None` when the media scan was skipped; the media categories
/// are then empty. Output is sorted by size descending, then path, so the
/// same inputs always give the same classification.
pub fn reconcile(
    local: &[FileEntry],
    media: Option<&[FileEntry]>,
    remote: &RemoteInventory,
    rule: &ReportRule,
) -> Classification {
    let owners = remote.file_index();

    let media_digests: Option<AHashSet<&str>> = media.map(|entries| {
        entries
            .iter()
            .filter_map(|e| e.content_digest.as_deref())
            .collect()
    });

    let mut orphans = Vec::new();
    let mut torrents_present = Vec::new();
    for entry in local {
        match owners.get(entry.relative_path.as_str()) {
            None => orphans.push(ClassifiedFile {
                path: entry.relative_path.clone(),
                source: Source::LocalTorrentFolder,
                size_bytes: entry.size_bytes,
                content_digest: entry.content_digest.clone(),
                label: None,
                item_id: None,
                include_in_report: true,
            }),
            Some(item) => {
                let has_media_copy = media_digests.as_ref().map(|digests| {
                    entry
                        .content_digest
                        .as_deref()
                        .map_or(false, |d| digests.contains(d))
                });
                torrents_present.push(ClassifiedFile {
                    path: entry.relative_path.clone(),
                    source: Source::Torrents,
                    size_bytes: entry.size_bytes,
                    content_digest: entry.content_digest.clone(),
                    label: item.label.clone(),
                    item_id: Some(item.item_id.clone()),
                    include_in_report: rule.includes(
                        entry.size_bytes,
                        item.label.as_deref(),
                        has_media_copy,
                    ),
                });
            }
        }
    }

    let mut media_orphans = Vec::new();
    let mut mismatched = Vec::new();
    if let Some(media) = media {
        let local_by_path: AHashMap<&str, &FileEntry> = local
            .iter()
            .map(|e| (e.relative_path.as_str(), e))
            .collect();

        for entry in media {
            if !owners.contains_key(entry.relative_path.as_str()) {
                media_orphans.push(ClassifiedFile {
                    path: entry.relative_path.clone(),
                    source: Source::Media,
                    size_bytes: entry.size_bytes,
                    content_digest: entry.content_digest.clone(),
                    label: None,
                    item_id: None,
                    include_in_report: true,
                });
            }

            let Some(torrent) = local_by_path.get(entry.relative_path.as_str()) else {
                continue;
            };
            if let (Some(torrent_digest), Some(media_digest)) =
                (&torrent.content_digest, &entry.content_digest)
            {
                if torrent_digest != media_digest {
                    mismatched.push(Mismatch {
                        path: entry.relative_path.clone(),
                        torrent_digest: torrent_digest.clone(),
                        media_digest: media_digest.clone(),
                        torrent_size: torrent.size_bytes,
                        media_size: entry.size_bytes,
                    });
                }
            }
        }
    }

    orphans.sort_by(by_size_then_path);
    torrents_present.sort_by(by_size_then_path);
    media_orphans.sort_by(by_size_then_path);
    mismatched.sort_by(|a, b| a.path.cmp(&b.path));

    debug!(
        "Reconciled: {} orphans, {} in torrents, {} media orphans, {} mismatched",
        orphans.len(),
        torrents_present.len(),
        media_orphans.len(),
        mismatched.len(),
    );

    Classification {
        orphans,
        torrents_present,
        media_orphans,
        mismatched,
        media_scanned: media.is_some(),
    }
}

fn by_size_then_path(a: &ClassifiedFile, b: &ClassifiedFile) -> Ordering {
    b.size_bytes
        .cmp(&a.size_bytes)
        .then_with(|| a.path.cmp(&b.path))
}
