use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use reqwest::blocking::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::{FetchWarning, InventorySource, RemoteFile, RemoteInventory, RemoteItem};
use crate::error::Error;
use crate::paths;

/// Fields requested for every torrent in the single bulk status call.
const TORRENT_FIELDS: [&str; 5] = ["name", "label", "state", "save_path", "files"];

/// Connection settings for the Deluge Web JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    /// `http(s)://host:port`, without the `/json` suffix.
    pub base_url: String,
    pub host_identity: String,
    pub password: String,
    /// The daemon-side folder that corresponds to the local torrent root.
    pub remote_base_folder: String,
    /// Upper bound for each individual request.
    pub timeout: Duration,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

#[derive(Deserialize)]
struct TorrentStatus {
    name: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    state: String,
    save_path: String,
    files: Vec<TorrentFile>,
}

#[derive(Deserialize)]
struct TorrentFile {
    path: String,
    size: u64,
}

/// Session handle on a Deluge daemon, reached through its web JSON-RPC API.
///
/// Opened once per run by [`DelugeClient::connect`] (login plus host
/// connection) and released with [`DelugeClient::close`]. Every request is
/// bounded by the configured timeout.
pub struct DelugeClient {
    http: HttpClient,
    endpoint: String,
    settings: DaemonSettings,
    next_id: AtomicU64,
}

impl DelugeClient {
    pub fn connect(settings: DaemonSettings) -> Result<Self, Error> {
        let http = HttpClient::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| Error::RemoteUnavailable(format!("cannot build HTTP client: {}", e)))?;

        let client = Self {
            http,
            endpoint: format!("{}/json", settings.base_url.trim_end_matches('/')),
            settings,
            next_id: AtomicU64::new(1),
        };

        debug!("Connecting to Deluge: {}", client.endpoint);
        client.login()?;
        client.ensure_daemon_connected()?;
        Ok(client)
    }

    /// End the web session. Failures are only logged; the run is over anyway.
    pub fn close(self) {
        if let Err(err) = self.call::<Value>("auth.delete_session", json!([])) {
            debug!("Closing Deluge session failed: {}", err);
        }
    }

    fn login(&self) -> Result<(), Error> {
        let accepted: bool = self.call("auth.login", json!([self.settings.password]))?;
        if accepted {
            Ok(())
        } else {
            Err(Error::RemoteUnavailable(format!(
                "login rejected by {}",
                self.settings.host_identity
            )))
        }
    }

    /// The web UI may be up without a daemon attached; attach the first
    /// configured host in that case.
    fn ensure_daemon_connected(&self) -> Result<(), Error> {
        let connected: bool = self.call("web.connected", json!([]))?;
        if connected {
            return Ok(());
        }

        let hosts: Vec<Value> = self.call("web.get_hosts", json!([]))?;
        let host_id = hosts
            .first()
            .and_then(|host| host.get(0))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::RemoteUnavailable("web UI has no daemon host configured".into()))?
            .to_string();
        self.call::<Value>("web.connect", json!([host_id]))?;
        Ok(())
    }

    fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, Error> {
        let request = RpcRequest {
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        debug!(method, "Deluge RPC request");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|e| self.transport_error(method, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::RemoteUnavailable(format!(
                "{} returned HTTP {}",
                method,
                status.as_u16()
            )));
        }

        let body: RpcResponse = response
            .json()
            .map_err(|e| self.transport_error(method, e))?;
        if let Some(err) = body.error {
            return Err(Error::RemoteUnavailable(format!(
                "{} failed: {} (code {})",
                method,
                err.message,
                err.code.unwrap_or_default()
            )));
        }

        serde_json::from_value(body.result).map_err(|e| {
            Error::RemoteUnavailable(format!("{} returned an unexpected result: {}", method, e))
        })
    }

    fn transport_error(&self, method: &str, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::RemoteUnavailable(format!(
                "{} timed out after {:?}",
                method, self.settings.timeout
            ))
        } else {
            Error::RemoteUnavailable(format!("{}: {}", method, err))
        }
    }
}

impl InventorySource for DelugeClient {
    fn host_identity(&self) -> String {
        self.settings.host_identity.clone()
    }

    fn fetch_all(&self) -> Result<RemoteInventory, Error> {
        info!("Fetching torrent list from {}...", self.settings.host_identity);
        let start = Instant::now();
        let raw: Map<String, Value> =
            self.call("core.get_torrents_status", json!([{}, TORRENT_FIELDS]))?;

        let inventory = parse_torrents(
            &self.settings.host_identity,
            &self.settings.remote_base_folder,
            raw,
        );
        info!(
            "Retrieved {} torrents / {} files in {:.2}s ({} warnings)",
            inventory.items.len(),
            inventory.file_count(),
            start.elapsed().as_secs_f64(),
            inventory.warnings.len(),
        );
        Ok(inventory)
    }
}

/// Turn the raw `core.get_torrents_status` map into an inventory. Malformed
/// items and files outside `remote_base` become warnings.
pub(crate) fn parse_torrents(
    host_identity: &str,
    remote_base: &str,
    raw: Map<String, Value>,
) -> RemoteInventory {
    let mut inventory = RemoteInventory::new(host_identity);

    for (item_id, value) in raw {
        let status: TorrentStatus = match serde_json::from_value(value) {
            Ok(status) => status,
            Err(e) => {
                warn!("Skipping malformed torrent {}: {}", item_id, e);
                inventory.warnings.push(FetchWarning {
                    item_id,
                    reason: format!("malformed status: {}", e),
                });
                continue;
            }
        };

        let mut files = Vec::with_capacity(status.files.len());
        for file in status.files {
            let full_path = paths::join_remote(&status.save_path, &file.path);
            match paths::relative_to_base(remote_base, &full_path) {
                Some(path) => files.push(RemoteFile {
                    path,
                    size_bytes: file.size,
                }),
                None => {
                    warn!(
                        "File '{}' appears outside base folder '{}'",
                        full_path, remote_base
                    );
                    inventory.warnings.push(FetchWarning {
                        item_id: item_id.clone(),
                        reason: format!("{} is outside {}", full_path, remote_base),
                    });
                }
            }
        }

        inventory.insert(RemoteItem {
            item_id,
            name: status.name,
            label: status.label.filter(|l| !l.is_empty()),
            state: status.state,
            files,
        });
    }

    inventory
}
