//! Path normalization shared by the filesystem scanner and the remote fetcher.
//!
//! Every path that takes part in reconciliation is a root-relative string with
//! `/` separators, no leading separator, no `.` or empty components and no
//! `..`. Case is preserved. The daemon side goes through [`relative_to_base`]
//! and the scanner through [`local_relative`], so membership tests across them
//! are exact string comparisons.

use std::path::{Component, Path};

/// Lexically normalize a `/`- or `\`-separated path into its components.
/// Returns `None` when `..` climbs above the start of the path.
fn components(raw: &str) -> Option<Vec<&str>> {
    let mut parts: Vec<&str> = Vec::new();
    for part in raw.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts)
}

/// Normalize a relative path string. `None` if it escapes its root or is empty.
pub fn normalize(raw: &str) -> Option<String> {
    let parts = components(raw)?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Make `path` relative to `base`, both given as (remote) path strings.
///
/// Works on strings rather than `Path` because remote paths belong to the
/// daemon's host and must not be interpreted with local OS rules.
pub fn relative_to_base(base: &str, path: &str) -> Option<String> {
    let base_parts = components(base)?;
    let path_parts = components(path)?;
    if path_parts.len() <= base_parts.len() || !path_parts.starts_with(&base_parts) {
        return None;
    }
    Some(path_parts[base_parts.len()..].join("/"))
}

/// Join a remote directory and a file path reported inside it.
pub fn join_remote(dir: &str, file: &str) -> String {
    if dir.is_empty() {
        return file.to_string();
    }
    format!("{}/{}", dir.trim_end_matches(['/', '\\']), file)
}

/// Relative, normalized form of a local `path` found under `root`.
pub fn local_relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts: Vec<String> = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// First path component, used for top-level subfolder blacklisting.
pub fn first_component(relative: &str) -> &str {
    relative.split('/').next().unwrap_or(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_normalize_collapses_redundant_parts() {
        assert_eq!(normalize("tv//Show/./ep1.mkv").as_deref(), Some("tv/Show/ep1.mkv"));
        assert_eq!(normalize("tv\\Show\\ep1.mkv").as_deref(), Some("tv/Show/ep1.mkv"));
        assert_eq!(normalize("/tv/a/../b.mkv").as_deref(), Some("tv/b.mkv"));
        assert_eq!(normalize("Movies/Film.MKV").as_deref(), Some("Movies/Film.MKV"));
    }

    #[test]
    fn test_normalize_rejects_escaping_paths() {
        assert_eq!(normalize("../outside.mkv"), None);
        assert_eq!(normalize("a/../../b"), None);
        assert_eq!(normalize("./"), None);
    }

    #[test]
    fn test_relative_to_base() {
        assert_eq!(
            relative_to_base("/data/torrents/", "/data/torrents/tv/show.mkv").as_deref(),
            Some("tv/show.mkv")
        );
        assert_eq!(
            relative_to_base("/data/torrents", "/data/torrents2/tv/show.mkv"),
            None
        );
        assert_eq!(relative_to_base("/data/torrents", "/data/torrents"), None);
        assert_eq!(
            relative_to_base("/data/torrents", "/data/torrents/tv/../movies/a.mkv").as_deref(),
            Some("movies/a.mkv")
        );
    }

    #[test]
    fn test_local_and_remote_forms_agree() {
        let root = PathBuf::from("/mnt/torrents");
        let local = local_relative(&root, &root.join("tv").join("Show S01").join("e01.mkv"));
        let remote = relative_to_base(
            "/downloads",
            &join_remote("/downloads/tv/", "Show S01/./e01.mkv"),
        );
        assert_eq!(local, remote);
        assert_eq!(local.as_deref(), Some("tv/Show S01/e01.mkv"));
    }

    #[test]
    fn test_first_component() {
        assert_eq!(first_component("music/album/track.flac"), "music");
        assert_eq!(first_component("file.mkv"), "file.mkv");
    }
}
