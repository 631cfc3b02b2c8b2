//! Remote torrent-client inventory.
//!
//! The engine only needs one capability from the daemon: "list every item
//! with its label, state and file list" in a bounded number of requests.
//! [`InventorySource`] is that seam; [`deluge::DelugeClient`] implements it.

pub mod deluge;

use std::collections::BTreeMap;

use ahash::AHashMap;
use serde::Serialize;

use crate::error::Error;

pub use deluge::{DaemonSettings, DelugeClient};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFile {
    /// Normalized path relative to the torrent base folder.
    pub path: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteItem {
    pub item_id: String,
    pub name: String,
    pub label: Option<String>,
    pub state: String,
    pub files: Vec<RemoteFile>,
}

/// An item (or one of its files) dropped from an otherwise good fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchWarning {
    pub item_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RemoteInventory {
    pub host_identity: String,
    pub items: BTreeMap<String, RemoteItem>,
    pub warnings: Vec<FetchWarning>,
}

impl RemoteInventory {
    pub fn new(host_identity: impl Into<String>) -> Self {
        Self {
            host_identity: host_identity.into(),
            ..Self::default()
        }
    }

    pub fn insert(&mut self, item: RemoteItem) {
        self.items.insert(item.item_id.clone(), item);
    }

    pub fn file_count(&self) -> usize {
        self.items.values().map(|i| i.files.len()).sum()
    }

    /// Path → owning item. When several items claim a path (cross-seeds), the
    /// one with the smallest id wins so the answer is stable across runs.
    pub fn file_index(&self) -> AHashMap<&str, &RemoteItem> {
        let mut index: AHashMap<&str, &RemoteItem> = AHashMap::with_capacity(self.file_count());
        for item in self.items.values() {
            for file in &item.files {
                index.entry(file.path.as_str()).or_insert(item);
            }
        }
        index
    }
}

/// Something that can produce the daemon's full inventory for one run.
pub trait InventorySource {
    /// `user@host:port` of the daemon, recorded on the scan run.
    fn host_identity(&self) -> String;

    /// Fetch every item in a bounded, item-count independent number of
    /// requests. Transport failures surface as `Error::RemoteUnavailable`.
    fn fetch_all(&self) -> Result<RemoteInventory, Error>;
}
