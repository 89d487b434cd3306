// ── Local → remote path mapping ──────────────────────────────────────────────

use crate::sftp::error::{SyncError, SyncResult};
use std::path::{Component, Path, PathBuf};

/// Maps files below the watched root onto the remote root.
///
/// The remote path is always `/`-separated, whatever the local convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    local_root: PathBuf,
    remote_root: String,
}

impl PathMapper {
    pub fn new(local_root: impl Into<PathBuf>, remote_root: &str) -> Self {
        Self {
            local_root: local_root.into(),
            remote_root: normalize_remote_root(remote_root),
        }
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    /// Segments of `local` relative to the watched root.
    pub fn relative_segments(&self, local: &Path) -> SyncResult<Vec<String>> {
        let relative = local
            .strip_prefix(&self.local_root)
            .map_err(|_| SyncError::OutsideRoot(local.to_path_buf()))?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => segments.extend(
                    part.to_string_lossy()
                        .split('\\')
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                ),
                Component::CurDir => {}
                _ => return Err(SyncError::OutsideRoot(local.to_path_buf())),
            }
        }
        Ok(segments)
    }

    pub fn remote_path(&self, local: &Path) -> SyncResult<String> {
        let segments = self.relative_segments(local)?;
        Ok(self.join_remote(&segments.join("/")))
    }

    /// Remote directory for a `/`-separated path relative to the remote root.
    pub fn remote_dir(&self, relative: &str) -> String {
        let cleaned: Vec<&str> = relative
            .split(['/', '\\'])
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();
        self.join_remote(&cleaned.join("/"))
    }

    fn join_remote(&self, relative: &str) -> String {
        if relative.is_empty() {
            self.remote_root.clone()
        } else if self.remote_root == "/" {
            format!("/{relative}")
        } else {
            format!("{}/{}", self.remote_root, relative)
        }
    }
}

fn normalize_remote_root(root: &str) -> String {
    let root = root.replace('\\', "/");
    let trimmed = root.trim_end_matches('/');
    if trimmed.is_empty() {
        if root.starts_with('/') {
            "/".to_string()
        } else {
            ".".to_string()
        }
    } else {
        trimmed.to_string()
    }
}

/// Parent directory of a remote path, `None` for the filesystem root.
pub fn remote_parent(remote: &str) -> Option<String> {
    let trimmed = remote.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) => Some("/".to_string()),
        Some((parent, _)) => Some(parent.to_string()),
        None => None,
    }
}

// ── Tracked extensions ───────────────────────────────────────────────────────

/// File-name suffixes that are mirrored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedExtensions(Vec<String>);

impl Default for TrackedExtensions {
    fn default() -> Self {
        Self(vec![".js".to_string(), ".js.map".to_string()])
    }
}

impl TrackedExtensions {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(suffixes.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };
        self.0.iter().any(|suffix| name.ends_with(suffix.as_str()))
    }

    pub fn suffixes(&self) -> &[String] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_nested_file_under_remote_root() {
        let m = PathMapper::new("/p/build/type", "/r");
        assert_eq!(
            m.remote_path(Path::new("/p/build/type/a/b.js")).unwrap(),
            "/r/a/b.js"
        );
    }

    #[test]
    fn trailing_slash_on_remote_root_is_ignored() {
        let m = PathMapper::new("/p/build/type", "/srv/app/");
        assert_eq!(
            m.remote_path(Path::new("/p/build/type/x.js")).unwrap(),
            "/srv/app/x.js"
        );
        assert_eq!(m.remote_root(), "/srv/app");
    }

    #[test]
    fn slash_root_does_not_double_separator() {
        let m = PathMapper::new("/p/b", "/");
        assert_eq!(m.remote_path(Path::new("/p/b/x/y.js")).unwrap(), "/x/y.js");
        assert_eq!(m.remote_dir(""), "/");
    }

    #[test]
    fn backslashes_become_forward_slashes() {
        let m = PathMapper::new("/p/b", "/r");
        assert_eq!(
            m.remote_path(Path::new("/p/b/dir\\file.js")).unwrap(),
            "/r/dir/file.js"
        );
        assert_eq!(m.remote_dir("a\\b/"), "/r/a/b");
    }

    #[test]
    fn paths_outside_root_are_rejected() {
        let m = PathMapper::new("/p/b", "/r");
        let err = m.remote_path(Path::new("/elsewhere/a.js")).unwrap_err();
        assert!(matches!(err, SyncError::OutsideRoot(_)));
    }

    #[test]
    fn remote_parent_walks_up() {
        assert_eq!(remote_parent("/r/a/b.js").as_deref(), Some("/r/a"));
        assert_eq!(remote_parent("/r.js").as_deref(), Some("/"));
        assert_eq!(remote_parent("r.js"), None);
    }

    #[test]
    fn tracked_extensions_match_js_and_source_maps() {
        let ext = TrackedExtensions::default();
        assert!(ext.matches(Path::new("/b/app.js")));
        assert!(ext.matches(Path::new("/b/app.js.map")));
        assert!(!ext.matches(Path::new("/b/app.ts")));
        assert!(!ext.matches(Path::new("/b/app.css.map")));
        assert!(!ext.matches(Path::new("/")));
    }
}
