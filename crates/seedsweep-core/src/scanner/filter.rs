use glob::{MatchOptions, Pattern};
use tracing::{error, trace};

use crate::paths;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Decides which entries of a tree take part in a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    extension_blacklist: Vec<String>,
    subfolder_blacklist: Vec<String>,
    skip_patterns: Vec<Pattern>,
    min_file_size: u64,
}

impl ScanFilter {
    /// `extension_blacklist` holds extensions with their dot (`.nfo`) or full
    /// file names (`Thumbs.db`); both compare case-insensitively.
    /// `subfolder_blacklist` names top-level folders of the scanned root.
    pub fn new(extension_blacklist: &[String], subfolder_blacklist: &[String]) -> Self {
        Self {
            extension_blacklist: extension_blacklist
                .iter()
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            subfolder_blacklist: subfolder_blacklist
                .iter()
                .map(|s| s.trim().trim_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            skip_patterns: Vec::new(),
            min_file_size: 0,
        }
    }

    pub fn with_min_file_size(mut self, bytes: u64) -> Self {
        self.min_file_size = bytes;
        self
    }

    /// Glob patterns matched case-insensitively against `/` + the relative
    /// path, so `*/sample*` catches a `Sample/` folder at any depth.
    pub fn with_skip_patterns(mut self, globs: &[String]) -> Self {
        self.skip_patterns = globs
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();
        self
    }

    /// True when the top-level folder `name` must not be descended into.
    pub fn skips_subfolder(&self, name: &str) -> bool {
        self.subfolder_blacklist.iter().any(|s| s == name)
    }

    /// True when the file at `relative` (normalized) with `size` is excluded.
    pub fn skips_file(&self, relative: &str, size: u64) -> bool {
        if self.skips_subfolder(paths::first_component(relative)) && relative.contains('/') {
            return true;
        }

        let name = relative.rsplit('/').next().unwrap_or(relative).to_lowercase();
        let extension = name.rfind('.').map(|i| &name[i..]);
        if self
            .extension_blacklist
            .iter()
            .any(|e| *e == name || Some(e.as_str()) == extension)
        {
            trace!("Skipping {} due to extension/name blacklist", relative);
            return true;
        }

        let rooted = format!("/{}", relative);
        if self
            .skip_patterns
            .iter()
            .any(|p| p.matches_with(&rooted, MATCH_OPTIONS))
        {
            trace!("Skipping {} due to skip pattern", relative);
            return true;
        }

        if size < self.min_file_size {
            trace!("Skipping {} because {} < {} bytes", relative, size, self.min_file_size);
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extension_and_name_blacklist() {
        let filter = ScanFilter::new(&strings(&[".nfo", ".SRT", "thumbs.db"]), &[]);
        assert!(filter.skips_file("movie/movie.nfo", 10));
        assert!(filter.skips_file("movie/movie.en.srt", 10));
        assert!(filter.skips_file("movie/Thumbs.db", 10));
        assert!(!filter.skips_file("movie/movie.mkv", 10));
        assert!(!filter.skips_file("movie/nfo", 10));
    }

    #[test]
    fn test_subfolder_blacklist_is_top_level_only() {
        let filter = ScanFilter::new(&[], &strings(&["music", "ebooks"]));
        assert!(filter.skips_subfolder("music"));
        assert!(filter.skips_file("music/album/track.flac", 10));
        assert!(!filter.skips_file("tv/music/track.flac", 10));
        assert!(!filter.skips_file("music", 10));
    }

    #[test]
    fn test_skip_patterns_and_min_size() {
        let filter = ScanFilter::new(&[], &[])
            .with_skip_patterns(&strings(&["*/sample*", "*-sample*"]))
            .with_min_file_size(100);
        assert!(filter.skips_file("movie/Sample/movie.mkv", 1000));
        assert!(filter.skips_file("sample.mkv", 1000));
        assert!(filter.skips_file("movie/movie-sample.mkv", 1000));
        assert!(!filter.skips_file("movie/movie.mkv", 1000));
        assert!(filter.skips_file("movie/movie.mkv", 99));
    }
}
