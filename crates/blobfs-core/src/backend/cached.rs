//! Attribute caching decorator for any [`StorageBackend`].
//!
//! Property and existence answers are kept for a short TTL so that the
//! `getattr` storms issued by directory walks do not each cost a remote
//! round-trip. Every mutation passing through the decorator invalidates the
//! affected paths (recursively for directory deletes and renames); changes
//! made by other clients become visible after the TTL.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tracing::{trace, warn};

use super::{BackendKind, StorageBackend};
use crate::error::BackendResult;
use crate::layout::normalize_path;
use crate::properties::{DirectoryState, ListEntry, ListPage, Metadata, PathKind, PathProperties};

/// Default maximum number of cached entries per table.
pub const DEFAULT_MAX_CAPACITY: u64 = 100_000;

/// Backend wrapper caching `get_properties` and `exists`.
pub struct CachedBackend {
    inner: Arc<dyn StorageBackend>,
    properties: Cache<String, PathProperties>,
    kinds: Cache<String, PathKind>,
    ttl: Duration,
}

impl CachedBackend {
    pub fn new(inner: Arc<dyn StorageBackend>, ttl: Duration) -> Self {
        Self::with_capacity(inner, ttl, DEFAULT_MAX_CAPACITY)
    }

    pub fn with_capacity(inner: Arc<dyn StorageBackend>, ttl: Duration, max_capacity: u64) -> Self {
        Self {
            inner,
            properties: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .support_invalidation_closures()
                .build(),
            kinds: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .support_invalidation_closures()
                .build(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn inner(&self) -> &Arc<dyn StorageBackend> {
        &self.inner
    }

    /// Drops the cached answers for one path.
    pub fn invalidate(&self, path: &str) {
        let key = normalize_path(path);
        self.properties.invalidate(key);
        self.kinds.invalidate(key);
    }

    /// Drops the cached answers for `path` and everything below it.
    pub fn invalidate_tree(&self, path: &str) {
        let root = normalize_path(path).to_string();
        if root.is_empty() {
            self.properties.invalidate_all();
            self.kinds.invalidate_all();
            return;
        }
        self.invalidate(&root);
        let prefix = format!("{root}/");
        let props_prefix = prefix.clone();
        if let Err(e) = self
            .properties
            .invalidate_entries_if(move |k, _| k.starts_with(&props_prefix))
        {
            warn!(path = %root, error = %e, "failed to invalidate cached properties");
        }
        if let Err(e) = self
            .kinds
            .invalidate_entries_if(move |k, _| k.starts_with(&prefix))
        {
            warn!(path = %root, error = %e, "failed to invalidate cached path kinds");
        }
    }

    /// Number of cached property entries (approximate, as reported by moka).
    pub fn cached_entries(&self) -> u64 {
        self.properties.run_pending_tasks();
        self.properties.entry_count()
    }
}

impl StorageBackend for CachedBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn authenticate(&self) -> BackendResult<()> {
        self.inner.authenticate()
    }

    fn exists(&self, path: &str) -> BackendResult<PathKind> {
        let key = normalize_path(path);
        if let Some(kind) = self.kinds.get(key) {
            trace!(path = key, "exists served from attribute cache");
            return Ok(kind);
        }
        let kind = self.inner.exists(key)?;
        self.kinds.insert(key.to_string(), kind);
        Ok(kind)
    }

    fn create_directory(&self, path: &str) -> BackendResult<()> {
        let result = self.inner.create_directory(path);
        self.invalidate(path);
        result
    }

    fn delete_directory(&self, path: &str) -> BackendResult<()> {
        let result = self.inner.delete_directory(path);
        self.invalidate_tree(path);
        result
    }

    fn directory_state(&self, path: &str) -> BackendResult<DirectoryState> {
        self.inner.directory_state(path)
    }

    fn list(
        &self,
        continuation: Option<&str>,
        prefix: &str,
        delimiter: Option<&str>,
        max_results: usize,
    ) -> BackendResult<ListPage> {
        self.inner.list(continuation, prefix, delimiter, max_results)
    }

    fn get_properties(&self, path: &str, type_known: bool) -> BackendResult<PathProperties> {
        let key = normalize_path(path);
        if let Some(props) = self.properties.get(key) {
            trace!(path = key, "properties served from attribute cache");
            return Ok(props);
        }
        let props = self.inner.get_properties(key, type_known)?;
        self.properties.insert(key.to_string(), props.clone());
        Ok(props)
    }

    fn rename(
        &self,
        source: &str,
        destination: &str,
        is_directory: bool,
    ) -> BackendResult<Vec<String>> {
        let result = self.inner.rename(source, destination, is_directory);
        self.invalidate_tree(source);
        self.invalidate_tree(destination);
        result
    }

    fn change_mode(&self, path: &str, mode: u32) -> BackendResult<()> {
        let result = self.inner.change_mode(path, mode);
        self.invalidate(path);
        result
    }

    fn update_property(&self, path: &str, key: &str, value: &str) -> BackendResult<Metadata> {
        let result = self.inner.update_property(path, key, value);
        self.invalidate(path);
        result
    }

    fn upload_file(&self, path: &str, local: &Path, metadata: &Metadata) -> BackendResult<()> {
        let result = self.inner.upload_file(path, local, metadata);
        self.invalidate(path);
        result
    }

    fn download_file(&self, path: &str, local: &Path) -> BackendResult<u64> {
        self.inner.download_file(path, local)
    }

    fn delete_file(&self, path: &str) -> BackendResult<()> {
        let result = self.inner.delete_file(path);
        self.invalidate(path);
        result
    }

    fn copy(&self, source: &str, destination: &str) -> BackendResult<()> {
        let result = self.inner.copy(source, destination);
        self.invalidate(destination);
        result
    }

    fn get_extra_properties(&self, path: &str, props: &mut PathProperties) -> BackendResult<()> {
        self.inner.get_extra_properties(path, props)
    }

    fn list_page_size(&self) -> usize {
        self.inner.list_page_size()
    }

    fn list_all(&self, prefix: &str, delimiter: Option<&str>) -> BackendResult<Vec<ListEntry>> {
        self.inner.list_all(prefix, delimiter)
    }
}

impl std::fmt::Debug for CachedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedBackend")
            .field("kind", &self.inner.kind())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
