//! Storage backend abstraction.
//!
//! [`StorageBackend`] is the one contract the filesystem layer talks to. Two
//! variants implement it:
//!
//! - [`FlatBackend`]: a blob container with no native directories. Directories
//!   are zero-length marker blobs, and a directory rename is emulated object
//!   by object (not atomic).
//! - [`HierarchicalBackend`]: a namespace with native directories and atomic
//!   directory moves.
//!
//! [`CachedBackend`] decorates either variant with a short-lived attribute
//! cache.
//!
//! Every remote failure leaves this layer as a [`BackendError`] whose
//! `to_errno()` is the value returned to the kernel. Backends never retry;
//! that is the remote client's job.

mod cached;
mod flat;
mod hierarchical;

pub use cached::CachedBackend;
pub use flat::FlatBackend;
pub use hierarchical::HierarchicalBackend;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{BackendError, BackendResult};
use crate::layout::CacheLayout;
use crate::locks::PathLockRegistry;
use crate::properties::{DirectoryState, ListEntry, ListPage, Metadata, PathKind, PathProperties};

/// Name suffix of the directory marker blobs written by older releases.
///
/// One such object inside a directory does not make it non-empty.
pub const LEGACY_DIRECTORY_MARKER: &str = ".directory";

/// Page size used by [`StorageBackend::list_all`] unless configured otherwise.
pub const DEFAULT_LIST_PAGE_SIZE: usize = 5000;

/// Which namespace model a backend implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Flat,
    Hierarchical,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Hierarchical => "hierarchical",
        }
    }

    /// Whether directories are native objects with atomic moves.
    pub fn is_hierarchical(self) -> bool {
        self == Self::Hierarchical
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Local state a backend needs to keep the cache tree consistent with remote
/// renames: the shared lock registry and the cache layout.
#[derive(Debug, Clone)]
pub struct CacheContext {
    pub locks: Arc<PathLockRegistry>,
    pub layout: CacheLayout,
}

impl CacheContext {
    pub fn new(locks: Arc<PathLockRegistry>, layout: CacheLayout) -> Self {
        Self { locks, layout }
    }
}

/// Operations the filesystem layer performs against remote storage.
///
/// Paths are logical paths; a leading slash is accepted and ignored.
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Verifies that the container is reachable with the configured
    /// credentials. Failure is fatal to mounting.
    fn authenticate(&self) -> BackendResult<()>;

    fn exists(&self, path: &str) -> BackendResult<PathKind>;

    fn create_directory(&self, path: &str) -> BackendResult<()>;

    /// Deletes an empty directory.
    ///
    /// Fails with [`BackendError::NotFound`] when it does not exist and with
    /// [`BackendError::DirectoryNotEmpty`] when it has children.
    fn delete_directory(&self, path: &str) -> BackendResult<()>;

    /// Bounded check of whether `path` exists and has children.
    fn directory_state(&self, path: &str) -> BackendResult<DirectoryState>;

    /// One page of a listing under `prefix`.
    ///
    /// `delimiter = Some("/")` lists one level; `None` lists every descendant.
    fn list(
        &self,
        continuation: Option<&str>,
        prefix: &str,
        delimiter: Option<&str>,
        max_results: usize,
    ) -> BackendResult<ListPage>;

    /// Properties of `path`. `type_known` tells the backend the caller already
    /// knows the path is a file, which saves a listing on the flat variant.
    fn get_properties(&self, path: &str, type_known: bool) -> BackendResult<PathProperties>;

    /// Renames a file or a directory and moves any cached copies with it.
    ///
    /// Returns the logical paths whose cached state must be invalidated.
    /// Takes the primary locks of both paths itself; callers must not hold
    /// them.
    fn rename(&self, source: &str, destination: &str, is_directory: bool)
    -> BackendResult<Vec<String>>;

    fn change_mode(&self, path: &str, mode: u32) -> BackendResult<()>;

    /// Sets one metadata key and returns the resulting metadata.
    ///
    /// An empty key or value leaves the remote object untouched.
    fn update_property(&self, path: &str, key: &str, value: &str) -> BackendResult<Metadata>;

    fn upload_file(&self, path: &str, local: &Path, metadata: &Metadata) -> BackendResult<()>;

    /// Downloads `path` into `local` and returns its size in bytes.
    fn download_file(&self, path: &str, local: &Path) -> BackendResult<u64>;

    fn delete_file(&self, path: &str) -> BackendResult<()>;

    fn copy(&self, source: &str, destination: &str) -> BackendResult<()>;

    /// Fills in properties a listing does not return (owner, group, ACL,
    /// metadata). Variants without such properties leave `props` untouched.
    fn get_extra_properties(&self, _path: &str, _props: &mut PathProperties) -> BackendResult<()> {
        Ok(())
    }

    fn list_page_size(&self) -> usize {
        DEFAULT_LIST_PAGE_SIZE
    }

    fn is_directory(&self, path: &str) -> BackendResult<bool> {
        Ok(self.exists(path)? == PathKind::Directory)
    }

    /// Whether an existing directory has no children.
    fn is_directory_empty(&self, path: &str) -> BackendResult<bool> {
        match self.directory_state(path)? {
            DirectoryState::Missing => Err(BackendError::not_found(path)),
            DirectoryState::Empty => Ok(true),
            DirectoryState::NotEmpty => Ok(false),
        }
    }

    /// Follows continuation tokens until the listing is exhausted.
    fn list_all(&self, prefix: &str, delimiter: Option<&str>) -> BackendResult<Vec<ListEntry>> {
        collect_pages(prefix, |continuation| {
            self.list(continuation, prefix, delimiter, self.list_page_size())
        })
    }
}

/// Shared paging loop of [`StorageBackend::list_all`].
///
/// The store may repeat the last entry of a page as the first entry of the
/// next one; the duplicate is dropped.
pub(crate) fn collect_pages<F>(prefix: &str, mut fetch: F) -> BackendResult<Vec<ListEntry>>
where
    F: FnMut(Option<&str>) -> BackendResult<ListPage>,
{
    let mut entries: Vec<ListEntry> = Vec::new();
    let mut continuation: Option<String> = None;
    loop {
        let page = fetch(continuation.as_deref())?;
        let skip_first = matches!(
            (entries.last(), page.entries.first()),
            (Some(last), Some(first)) if last.name == first.name
        );
        entries.extend(page.entries.into_iter().skip(usize::from(skip_first)));
        match page.continuation {
            Some(token) if !token.is_empty() => continuation = Some(token),
            _ => break,
        }
    }
    tracing::trace!(prefix, count = entries.len(), "listing complete");
    Ok(entries)
}

/// Whether `name` is a legacy directory marker object.
pub(crate) fn is_legacy_marker(name: &str) -> bool {
    name.len() > LEGACY_DIRECTORY_MARKER.len() && name.ends_with(LEGACY_DIRECTORY_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> ListEntry {
        ListEntry {
            name: name.to_string(),
            is_directory: false,
            size: 0,
            last_modified: None,
            metadata: Metadata::new(),
            mode: None,
        }
    }

    #[test]
    fn test_collect_pages_drops_repeated_boundary_entry() {
        let pages = [
            ListPage {
                entries: vec![entry("a"), entry("b")],
                continuation: Some("1".to_string()),
            },
            ListPage {
                entries: vec![entry("b"), entry("c")],
                continuation: Some(String::new()),
            },
        ];
        let mut calls = 0;
        let all = collect_pages("", |token| {
            let page = pages[calls].clone();
            assert_eq!(token.is_some(), calls > 0);
            calls += 1;
            Ok(page)
        })
        .unwrap();

        let names: Vec<_> = all.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_collect_pages_propagates_errors() {
        let result = collect_pages("p", |_| Err(BackendError::not_found("p")));
        assert!(result.unwrap_err().is_not_found());
    }

    #[test]
    fn test_legacy_marker_names() {
        assert!(is_legacy_marker("dir/.directory"));
        assert!(!is_legacy_marker(".directory"));
        assert!(!is_legacy_marker("dir/file"));
    }

    #[test]
    fn test_backend_kind() {
        assert!(BackendKind::Hierarchical.is_hierarchical());
        assert_eq!(BackendKind::Flat.to_string(), "flat");
    }
}
