//! Flat-namespace backend: directories simulated over a blob container.
//!
//! A directory `a/b` exists when either a zero-length marker blob `a/b` with
//! metadata `hdi_isfolder=true` exists, or at least one object is named
//! `a/b/...` (a "virtual" directory created by another tool).
//!
//! There is no rename primitive: a file rename is copy + delete, and a
//! directory rename repeats that for every descendant object. A failure in
//! the middle of a directory rename leaves some objects under the new name and
//! the rest under the old one; the operation stops at the first failure.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, instrument, warn};

use super::{
    BackendKind, CacheContext, DEFAULT_LIST_PAGE_SIZE, StorageBackend, is_legacy_marker,
};
use crate::error::{BackendError, BackendResult};
use crate::layout::{directory_prefix, normalize_path, rebase_path};
use crate::properties::{
    DirectoryState, LAST_CHANGE_KEY, ListEntry, ListPage, Metadata, PathKind,
    PathProperties, ResourceType, unix_seconds,
};
use crate::remote::{BlobClient, BlobItem, BlobProperties};

/// Number of entries requested when probing a directory for children.
const EMPTINESS_PROBE_SIZE: usize = 2;

/// Backend for containers without a hierarchical namespace.
pub struct FlatBackend {
    client: Arc<dyn BlobClient>,
    cache: CacheContext,
    page_size: usize,
}

impl FlatBackend {
    pub fn new(client: Arc<dyn BlobClient>, cache: CacheContext) -> Self {
        Self {
            client,
            cache,
            page_size: DEFAULT_LIST_PAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_list_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Properties of the object named exactly `path`, `None` if there is none.
    fn blob_properties(&self, path: &str) -> BackendResult<Option<BlobProperties>> {
        match self.client.get_blob_properties(path) {
            Ok(props) => Ok(Some(props)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(BackendError::remote("get_blob_properties", path, e)),
        }
    }

    /// Whether any object lives under `path/`.
    fn has_children(&self, path: &str) -> BackendResult<bool> {
        let prefix = directory_prefix(path);
        let listing = self
            .client
            .list_blobs(&prefix, Some("/"), None, 1)
            .map_err(|e| BackendError::remote("list_blobs", path, e))?;
        Ok(!listing.items.is_empty())
    }

    fn file_properties(props: BlobProperties) -> PathProperties {
        let resource_type = if props.metadata.is_folder_marker() {
            ResourceType::Directory
        } else {
            ResourceType::File
        };
        PathProperties {
            size: props.size,
            last_modified: props.last_modified,
            content_md5: props.content_md5,
            etag: props.etag,
            metadata: props.metadata,
            resource_type,
            permissions: None,
            owner: None,
            group: None,
        }
    }

    fn list_entry(item: BlobItem) -> ListEntry {
        let is_directory = item.is_prefix || item.metadata.is_folder_marker();
        ListEntry {
            name: normalize_path(&item.name).to_string(),
            is_directory,
            size: item.size,
            last_modified: item.last_modified,
            metadata: item.metadata,
            mode: None,
        }
    }

    /// Copy then delete one object, moving its cached copy along.
    fn rename_single_file(&self, source: &str, destination: &str) -> BackendResult<()> {
        let _guards = self.cache.locks.lock_pair(source, destination);

        self.client
            .copy_blob(source, destination)
            .map_err(|e| BackendError::remote("copy_blob", source, e))?;
        self.client
            .delete_blob(source)
            .map_err(|e| BackendError::remote("delete_blob", source, e))?;

        if let Err(e) = self.cache.layout.rename_cached(source, destination) {
            warn!(source, destination, error = %e, "failed to move cached copy after rename");
        }
        Ok(())
    }

    fn rename_directory(&self, source: &str, destination: &str) -> BackendResult<Vec<String>> {
        let has_marker = self
            .blob_properties(source)?
            .is_some_and(|props| props.metadata.is_folder_marker());

        if has_marker {
            self.create_directory(destination)?;
        }

        let descendants = self.list_all(&directory_prefix(source), None)?;
        let mut renamed = Vec::with_capacity(descendants.len());
        for entry in descendants {
            if entry.name == source {
                continue;
            }
            let Some(target) = rebase_path(&entry.name, source, destination) else {
                continue;
            };
            self.rename_single_file(&entry.name, &target)?;
            renamed.push(target);
        }

        if has_marker {
            let _guards = self.cache.locks.lock_pair(source, destination);
            self.client
                .delete_blob(source)
                .map_err(|e| BackendError::remote("delete_blob", source, e))?;
        }

        debug!(source, destination, count = renamed.len(), "renamed directory");
        Ok(renamed)
    }
}

impl StorageBackend for FlatBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Flat
    }

    #[instrument(level = "info", skip(self))]
    fn authenticate(&self) -> BackendResult<()> {
        self.client
            .list_blobs("", Some("/"), None, 1)
            .map(|_| ())
            .map_err(|e| BackendError::Authentication {
                reason: e.to_string(),
            })
    }

    #[instrument(level = "debug", skip(self))]
    fn exists(&self, path: &str) -> BackendResult<PathKind> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Ok(PathKind::Directory);
        }
        match self.blob_properties(path)? {
            Some(props) if props.metadata.is_folder_marker() => Ok(PathKind::Directory),
            Some(_) => Ok(PathKind::File),
            None if self.has_children(path)? => Ok(PathKind::Directory),
            None => Ok(PathKind::NotFound),
        }
    }

    #[instrument(level = "debug", skip(self))]
    fn create_directory(&self, path: &str) -> BackendResult<()> {
        let path = normalize_path(path);
        self.client
            .put_blob(path, &[], &Metadata::folder_marker())
            .map_err(|e| BackendError::remote("create_directory", path, e))?;
        debug!(path, "uploaded directory marker");
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    fn delete_directory(&self, path: &str) -> BackendResult<()> {
        let path = normalize_path(path);
        match self.directory_state(path)? {
            DirectoryState::Missing => Err(BackendError::not_found(path)),
            DirectoryState::NotEmpty => Err(BackendError::DirectoryNotEmpty {
                path: path.to_string(),
            }),
            // A directory kept alive only by a legacy marker has no marker blob.
            DirectoryState::Empty => match self.client.delete_blob(path) {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(BackendError::remote("delete_directory", path, e)),
            },
        }
    }

    #[instrument(level = "debug", skip(self))]
    fn directory_state(&self, path: &str) -> BackendResult<DirectoryState> {
        let path = normalize_path(path);
        let prefix = directory_prefix(path);
        let mut legacy_marker_seen = false;
        let mut continuation: Option<String> = None;

        loop {
            let listing = self
                .client
                .list_blobs(&prefix, Some("/"), continuation.as_deref(), EMPTINESS_PROBE_SIZE)
                .map_err(|e| BackendError::remote("list_blobs", path, e))?;

            for item in &listing.items {
                let name = normalize_path(&item.name);
                if name == path {
                    continue;
                }
                if !legacy_marker_seen && !item.is_prefix && is_legacy_marker(name) {
                    legacy_marker_seen = true;
                    continue;
                }
                return Ok(DirectoryState::NotEmpty);
            }

            // A page can come back empty with a continuation token; the
            // remaining pages may still hold children.
            match listing.next_marker {
                Some(token) if !token.is_empty() => continuation = Some(token),
                _ => break,
            }
        }

        if path.is_empty() || legacy_marker_seen {
            return Ok(DirectoryState::Empty);
        }
        match self.blob_properties(path)? {
            Some(props) if props.metadata.is_folder_marker() => Ok(DirectoryState::Empty),
            Some(_) => Err(BackendError::NotADirectory {
                path: path.to_string(),
            }),
            None => Ok(DirectoryState::Missing),
        }
    }

    #[instrument(level = "trace", skip(self))]
    fn list(
        &self,
        continuation: Option<&str>,
        prefix: &str,
        delimiter: Option<&str>,
        max_results: usize,
    ) -> BackendResult<ListPage> {
        let prefix = prefix.trim_start_matches('/');
        let listing = self
            .client
            .list_blobs(prefix, delimiter, continuation, max_results)
            .map_err(|e| BackendError::remote("list_blobs", prefix, e))?;
        Ok(ListPage {
            entries: listing.items.into_iter().map(Self::list_entry).collect(),
            continuation: listing.next_marker.filter(|t| !t.is_empty()),
        })
    }

    #[instrument(level = "debug", skip(self))]
    fn get_properties(&self, path: &str, type_known: bool) -> BackendResult<PathProperties> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Ok(PathProperties::virtual_directory());
        }
        if let Some(props) = self.blob_properties(path)? {
            return Ok(Self::file_properties(props));
        }
        if !type_known && self.has_children(path)? {
            return Ok(PathProperties::virtual_directory());
        }
        Err(BackendError::not_found(path))
    }

    #[instrument(level = "info", skip(self))]
    fn rename(
        &self,
        source: &str,
        destination: &str,
        is_directory: bool,
    ) -> BackendResult<Vec<String>> {
        let (source, destination) = (normalize_path(source), normalize_path(destination));
        if is_directory {
            self.rename_directory(source, destination)
        } else {
            self.rename_single_file(source, destination)?;
            Ok(vec![destination.to_string()])
        }
    }

    /// The flat namespace has no permission model; modes are not persisted.
    fn change_mode(&self, path: &str, mode: u32) -> BackendResult<()> {
        debug!(path, mode = %format!("{mode:o}"), "ignoring chmod on flat namespace");
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    fn update_property(&self, path: &str, key: &str, value: &str) -> BackendResult<Metadata> {
        let path = normalize_path(path);
        let mut metadata = self
            .blob_properties(path)?
            .ok_or_else(|| BackendError::not_found(path))?
            .metadata;
        if key.is_empty() || value.is_empty() {
            return Ok(metadata);
        }
        metadata.set(key, value);
        self.client
            .set_blob_metadata(path, &metadata)
            .map_err(|e| BackendError::remote("set_blob_metadata", path, e))?;
        Ok(metadata)
    }

    #[instrument(level = "debug", skip(self, metadata), fields(local = %local.display()))]
    fn upload_file(&self, path: &str, local: &Path, metadata: &Metadata) -> BackendResult<()> {
        let path = normalize_path(path);
        let mut metadata = metadata.clone();
        metadata.set(LAST_CHANGE_KEY, unix_seconds(SystemTime::now()));
        self.client
            .upload_from_file(path, local, &metadata)
            .map_err(|e| BackendError::remote("upload", path, e))
    }

    #[instrument(level = "debug", skip(self), fields(local = %local.display()))]
    fn download_file(&self, path: &str, local: &Path) -> BackendResult<u64> {
        let path = normalize_path(path);
        self.cache.layout.ensure_parent_dirs(local)?;
        self.client
            .download_to_file(path, local)
            .map_err(|e| BackendError::remote("download", path, e))
    }

    #[instrument(level = "debug", skip(self))]
    fn delete_file(&self, path: &str) -> BackendResult<()> {
        let path = normalize_path(path);
        self.client
            .delete_blob(path)
            .map_err(|e| BackendError::remote("delete_blob", path, e))
    }

    #[instrument(level = "debug", skip(self))]
    fn copy(&self, source: &str, destination: &str) -> BackendResult<()> {
        let (source, destination) = (normalize_path(source), normalize_path(destination));
        self.client
            .copy_blob(source, destination)
            .map_err(|e| BackendError::remote("copy_blob", source, e))
    }

    fn list_page_size(&self) -> usize {
        self.page_size
    }
}

impl std::fmt::Debug for FlatBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatBackend")
            .field("layout", &self.cache.layout)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
