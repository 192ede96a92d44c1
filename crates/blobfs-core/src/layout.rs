//! Mapping between logical remote paths and the local cache tree.
//!
//! Cached copies live at `<cache_root>/root/<logical_path>`. Logical paths are
//! stored without a leading slash (`a/b/c.txt`); callers coming from the
//! filesystem side may pass `/a/b/c.txt` and get the same result.

use std::fs;
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{BackendError, BackendResult};

/// Name of the directory under the cache root that mirrors the container.
pub const CACHE_TREE_DIR: &str = "root";

/// Strips leading and trailing slashes from a logical path.
pub fn normalize_path(path: &str) -> &str {
    path.trim_matches('/')
}

/// Joins a directory path and an entry name into a logical path.
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = normalize_path(dir);
    let name = normalize_path(name);
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Parent of a logical path, `""` for top-level entries.
pub fn parent_path(path: &str) -> &str {
    let path = normalize_path(path);
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

/// Listing prefix selecting the children of `dir` (`"a/b/"`, or `""` for the root).
pub fn directory_prefix(dir: &str) -> String {
    let dir = normalize_path(dir);
    if dir.is_empty() {
        String::new()
    } else {
        format!("{dir}/")
    }
}

/// Rewrites `path` from under `src` to under `dst`.
///
/// Returns `None` when `path` is neither `src` nor one of its descendants.
pub fn rebase_path(path: &str, src: &str, dst: &str) -> Option<String> {
    let (path, src, dst) = (normalize_path(path), normalize_path(src), normalize_path(dst));
    if path == src {
        return Some(dst.to_string());
    }
    let rest = path.strip_prefix(src)?.strip_prefix('/')?;
    Some(join_path(dst, rest))
}

/// Local cache directory layout.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    cache_root: PathBuf,
    tree_root: PathBuf,
    dir_mode: u32,
}

impl CacheLayout {
    /// Creates a layout rooted at `cache_root`; directories created in the
    /// tree get permission bits `dir_mode`.
    pub fn new(cache_root: impl Into<PathBuf>, dir_mode: u32) -> Self {
        let cache_root = cache_root.into();
        let tree_root = cache_root.join(CACHE_TREE_DIR);
        Self {
            cache_root,
            tree_root,
            dir_mode,
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// `<cache_root>/root`
    pub fn tree_root(&self) -> &Path {
        &self.tree_root
    }

    pub fn dir_mode(&self) -> u32 {
        self.dir_mode
    }

    /// Local path for a logical path.
    pub fn local_path(&self, logical: &str) -> PathBuf {
        let logical = normalize_path(logical);
        if logical.is_empty() {
            self.tree_root.clone()
        } else {
            self.tree_root.join(logical)
        }
    }

    /// Inverse of [`local_path`](Self::local_path) for paths inside the tree.
    pub fn logical_path(&self, local: &Path) -> Option<String> {
        let rest = local.strip_prefix(&self.tree_root).ok()?;
        Some(rest.to_str()?.to_string())
    }

    /// Creates the tree root itself.
    pub fn ensure_tree_root(&self) -> BackendResult<()> {
        self.create_dir_all(&self.tree_root)
    }

    /// Creates every missing parent directory of `local`.
    ///
    /// Concurrent creation of the same directory by another thread is not an
    /// error.
    pub fn ensure_parent_dirs(&self, local: &Path) -> BackendResult<()> {
        match local.parent() {
            Some(parent) => self.create_dir_all(parent),
            None => Ok(()),
        }
    }

    fn create_dir_all(&self, dir: &Path) -> BackendResult<()> {
        match fs::DirBuilder::new()
            .recursive(true)
            .mode(self.dir_mode)
            .create(dir)
        {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
            Err(e) => Err(BackendError::io(dir, e)),
        }
    }

    /// Whether a cached copy of `logical` exists.
    pub fn is_cached(&self, logical: &str) -> bool {
        fs::symlink_metadata(self.local_path(logical)).is_ok()
    }

    /// Moves the cached copy of `src` to `dst` if one exists.
    ///
    /// Returns whether anything was moved.
    pub fn rename_cached(&self, src: &str, dst: &str) -> BackendResult<bool> {
        let from = self.local_path(src);
        if fs::symlink_metadata(&from).is_err() {
            return Ok(false);
        }
        let to = self.local_path(dst);
        self.ensure_parent_dirs(&to)?;
        fs::rename(&from, &to).map_err(|e| BackendError::io(&from, e))?;
        debug!(src, dst, "renamed cached copy");
        Ok(true)
    }

    /// Applies `mode` to the cached copy of `logical` if one exists.
    ///
    /// Returns whether a cached copy was present.
    pub fn chmod_cached(&self, logical: &str, mode: u32) -> BackendResult<bool> {
        let local = self.local_path(logical);
        if fs::symlink_metadata(&local).is_err() {
            return Ok(false);
        }
        fs::set_permissions(&local, fs::Permissions::from_mode(mode))
            .map_err(|e| BackendError::io(&local, e))?;
        Ok(true)
    }

    /// Cached regular files at or below `logical`, with their sizes.
    ///
    /// A file path yields itself; a missing path yields nothing.
    pub fn cached_files(&self, logical: &str) -> BackendResult<Vec<(String, u64)>> {
        let start = self.local_path(logical);
        if fs::symlink_metadata(&start).is_err() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&start).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map_or_else(|| start.clone(), Path::to_path_buf);
                BackendError::io(path, io::Error::other(e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(path) = self.logical_path(entry.path()) else {
                continue;
            };
            let size = entry
                .metadata()
                .map_err(|e| BackendError::io(entry.path(), io::Error::other(e)))?
                .len();
            files.push((path, size));
        }
        Ok(files)
    }

    /// Removes the cached copy of a file. A missing file is not an error.
    pub fn remove_cached(&self, logical: &str) -> BackendResult<()> {
        let local = self.local_path(logical);
        match fs::remove_file(&local) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackendError::io(&local, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_path_helpers() {
        assert_eq!(normalize_path("/a/b/"), "a/b");
        assert_eq!(join_path("", "x"), "x");
        assert_eq!(join_path("/a", "x"), "a/x");
        assert_eq!(parent_path("a/b/c"), "a/b");
        assert_eq!(parent_path("a"), "");
        assert_eq!(directory_prefix("a/b"), "a/b/");
        assert_eq!(directory_prefix("/"), "");
    }

    #[test]
    fn test_rebase_path() {
        assert_eq!(rebase_path("a/b", "a/b", "c").as_deref(), Some("c"));
        assert_eq!(rebase_path("a/b/x/y", "a/b", "c/d").as_deref(), Some("c/d/x/y"));
        assert_eq!(rebase_path("a/bc", "a/b", "c"), None);
        assert_eq!(rebase_path("z", "a", "c"), None);
    }

    #[test]
    fn test_local_path_mirrors_logical_path() {
        let layout = CacheLayout::new("/var/cache/blobfs", 0o770);
        assert_eq!(
            layout.local_path("/dir/file.txt"),
            PathBuf::from("/var/cache/blobfs/root/dir/file.txt")
        );
        assert_eq!(layout.local_path("dir/file.txt"), layout.local_path("/dir/file.txt"));
        assert_eq!(
            layout.logical_path(&layout.local_path("dir/file.txt")).as_deref(),
            Some("dir/file.txt")
        );
    }

    #[test]
    fn test_ensure_parent_dirs_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let layout = CacheLayout::new(tmp.path(), 0o770);
        let local = layout.local_path("a/b/c/file");

        layout.ensure_parent_dirs(&local).unwrap();
        layout.ensure_parent_dirs(&local).unwrap();
        assert!(layout.local_path("a/b/c").is_dir());
    }

    #[test]
    fn test_rename_cached() {
        let tmp = TempDir::new().unwrap();
        let layout = CacheLayout::new(tmp.path(), 0o770);

        assert!(!layout.rename_cached("missing", "other").unwrap());

        let src = layout.local_path("src/file");
        layout.ensure_parent_dirs(&src).unwrap();
        fs::write(&src, b"data").unwrap();

        assert!(layout.rename_cached("src/file", "dst/nested/file").unwrap());
        assert!(!src.exists());
        assert_eq!(fs::read(layout.local_path("dst/nested/file")).unwrap(), b"data");
    }

    #[test]
    fn test_chmod_cached() {
        let tmp = TempDir::new().unwrap();
        let layout = CacheLayout::new(tmp.path(), 0o770);
        assert!(!layout.chmod_cached("nope", 0o600).unwrap());

        let local = layout.local_path("f");
        layout.ensure_parent_dirs(&local).unwrap();
        fs::write(&local, b"").unwrap();

        assert!(layout.chmod_cached("f", 0o640).unwrap());
        let mode = fs::metadata(&local).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[test]
    fn test_cached_files_walks_subtree() {
        let tmp = TempDir::new().unwrap();
        let layout = CacheLayout::new(tmp.path(), 0o770);
        assert!(layout.cached_files("d").unwrap().is_empty());

        for (name, data) in [("d/a", &b"1"[..]), ("d/sub/b", b"22"), ("other", b"333")] {
            let local = layout.local_path(name);
            layout.ensure_parent_dirs(&local).unwrap();
            fs::write(&local, data).unwrap();
        }

        assert_eq!(
            layout.cached_files("d").unwrap(),
            vec![("d/a".to_string(), 1), ("d/sub/b".to_string(), 2)]
        );
        assert_eq!(layout.cached_files("other").unwrap(), vec![("other".to_string(), 3)]);
    }
}
