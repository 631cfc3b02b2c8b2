use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};

use crate::reconcile::ReportRule;
use crate::remote::DaemonSettings;
use crate::scanner::ScanFilter;
use crate::storage::DeletionPolicy;

const LIST_KEYS: [&str; 4] = [
    "extensions_blacklist",
    "local_subfolders_blacklist",
    "skip_patterns",
    "report_excluded_label_prefixes",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub deluge_host: String,
    pub deluge_port: u16,
    pub deluge_username: String,
    pub deluge_password: String,
    pub deluge_use_https: bool,
    /// Folder on the daemon's side that holds every torrent's data.
    pub deluge_torrent_base_remote_folder: String,
    /// The same folder as mounted locally.
    pub local_torrent_base_local_folder: String,
    pub local_media_base_local_folder: String,
    pub sqlite_cache_path: String,
    pub extensions_blacklist: Vec<String>,
    pub local_subfolders_blacklist: Vec<String>,
    pub skip_patterns: Vec<String>,
    pub min_file_size_mb: u64,
    pub deletion_consecutive_scans_threshold: u32,
    pub deletion_days_threshold: i64,
    pub request_timeout_secs: u64,
    /// Hashing threads; 0 means one per core.
    pub hash_threads: usize,
    pub skip_media_check: bool,
    pub report_min_size_bytes: u64,
    pub report_excluded_label_prefixes: Vec<String>,
    pub report_require_missing_from_media: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let rule = ReportRule::default();
        Self {
            deluge_host: String::new(),
            deluge_port: 8112,
            deluge_username: String::new(),
            deluge_password: String::new(),
            deluge_use_https: false,
            deluge_torrent_base_remote_folder: String::new(),
            local_torrent_base_local_folder: String::new(),
            local_media_base_local_folder: String::new(),
            sqlite_cache_path: "seedsweep.db".to_string(),
            extensions_blacklist: strings(&[
                ".nfo", ".srt", ".jpg", ".sfv", ".txt", ".png", ".sub", ".torrent", ".plexmatch",
                ".m3u", ".json", ".webp", ".jpeg", ".obj", ".ini", ".dtshd", ".invalid",
            ]),
            local_subfolders_blacklist: strings(&["music", "ebooks", "courses"]),
            skip_patterns: strings(&[
                "*/sample*",
                "*/featurettes*",
                "*/extras*",
                "*.sample*",
                "*-sample*",
            ]),
            min_file_size_mb: 10,
            deletion_consecutive_scans_threshold: 7,
            deletion_days_threshold: 7,
            request_timeout_secs: 30,
            hash_threads: 0,
            skip_media_check: false,
            report_min_size_bytes: rule.min_size_bytes,
            report_excluded_label_prefixes: rule.excluded_label_prefixes,
            report_require_missing_from_media: rule.require_missing_from_media,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Built-in defaults, then an optional `Config.toml` in the working
/// directory, then the environment (`DELUGE_HOST`, `EXTENSIONS_BLACKLIST=.nfo,.txt`, ...).
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    build(ConfigFile::with_name("Config").required(false))
}

/// Like [`load_configuration`] with an explicit config file.
pub fn load_configuration_from(path: &Path) -> Result<AppConfig, ConfigError> {
    build(ConfigFile::from(path).required(true))
}

fn build<S>(file: S) -> Result<AppConfig, ConfigError>
where
    S: config::Source + Send + Sync + 'static,
{
    let mut environment = Environment::default()
        .try_parsing(true)
        .list_separator(",");
    for key in LIST_KEYS {
        environment = environment.with_list_parse_key(key);
    }

    let builder = Config::builder()
        .add_source(Config::try_from(&AppConfig::default())?)
        .add_source(file)
        .add_source(environment)
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

impl AppConfig {
    /// Check everything a run needs before any work starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("deluge_host", &self.deluge_host)?;
        require(
            "deluge_torrent_base_remote_folder",
            &self.deluge_torrent_base_remote_folder,
        )?;
        require_dir("local_torrent_base_local_folder", &self.local_torrent_base_local_folder)?;

        if !self.skip_media_check {
            require_dir("local_media_base_local_folder", &self.local_media_base_local_folder)?;
            let roots = vec![
                self.local_torrent_base_local_folder.clone(),
                self.local_media_base_local_folder.clone(),
            ];
            if non_overlapping_directories(roots).len() < 2 {
                return Err(ConfigError::Message(format!(
                    "torrent folder '{}' and media folder '{}' must not contain each other",
                    self.local_torrent_base_local_folder, self.local_media_base_local_folder
                )));
            }
        }

        if let Some(parent) = Path::new(&self.sqlite_cache_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(ConfigError::Message(format!(
                    "parent directory of sqlite_cache_path does not exist: {}",
                    parent.display()
                )));
            }
        }

        if self.deletion_consecutive_scans_threshold == 0 {
            return Err(ConfigError::Message(
                "deletion_consecutive_scans_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn torrent_root(&self) -> PathBuf {
        PathBuf::from(&self.local_torrent_base_local_folder)
    }

    pub fn media_root(&self) -> PathBuf {
        PathBuf::from(&self.local_media_base_local_folder)
    }

    pub fn scan_filter(&self) -> ScanFilter {
        ScanFilter::new(&self.extensions_blacklist, &self.local_subfolders_blacklist)
            .with_skip_patterns(&self.skip_patterns)
            .with_min_file_size(self.min_file_size_mb * 1024 * 1024)
    }

    pub fn deletion_policy(&self) -> DeletionPolicy {
        DeletionPolicy::new(
            self.deletion_consecutive_scans_threshold,
            self.deletion_days_threshold,
        )
    }

    pub fn report_rule(&self) -> ReportRule {
        ReportRule {
            min_size_bytes: self.report_min_size_bytes,
            excluded_label_prefixes: self.report_excluded_label_prefixes.clone(),
            require_missing_from_media: self.report_require_missing_from_media,
        }
    }

    pub fn host_identity(&self) -> String {
        format!("{}@{}:{}", self.deluge_username, self.deluge_host, self.deluge_port)
    }

    pub fn daemon_settings(&self) -> DaemonSettings {
        let scheme = if self.deluge_use_https { "https" } else { "http" };
        DaemonSettings {
            base_url: format!("{}://{}:{}", scheme, self.deluge_host, self.deluge_port),
            host_identity: self.host_identity(),
            password: self.deluge_password.clone(),
            remote_base_folder: self.deluge_torrent_base_remote_folder.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
        }
    }

    /// Copy safe to print or log.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.deluge_password.is_empty() {
            copy.deluge_password = "********".to_string();
        }
        copy
    }
}

fn require(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::NotFound(key.to_string()))
    } else {
        Ok(())
    }
}

fn require_dir(key: &str, value: &str) -> Result<(), ConfigError> {
    require(key, value)?;
    if Path::new(value).is_dir() {
        Ok(())
    } else {
        Err(ConfigError::Message(format!(
            "{} is not an existing directory: {}",
            key, value
        )))
    }
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        if result.iter().any(|kept| dir_path.starts_with(kept)) {
            continue;
        }
        result.retain(|kept| !Path::new(kept).starts_with(dir_path));
        result.push(dir);
    }

    result
}
