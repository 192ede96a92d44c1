//! Hierarchical-namespace backend: native directories and atomic moves.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, instrument, warn};

use super::{
    BackendKind, CacheContext, DEFAULT_LIST_PAGE_SIZE, StorageBackend, is_legacy_marker,
};
use crate::acl::{acl_string_to_mode_or_zero, mode_to_acl_string};
use crate::error::{BackendError, BackendResult};
use crate::layout::normalize_path;
use crate::properties::{
    DirectoryState, LAST_CHANGE_KEY, ListEntry, ListPage, Metadata, PathKind, PathProperties,
    ResourceType, unix_seconds,
};
use crate::remote::{DfsClient, DfsPathItem, DfsProperties};

const EMPTINESS_PROBE_SIZE: usize = 2;

/// Backend for containers with a hierarchical namespace.
pub struct HierarchicalBackend {
    client: Arc<dyn DfsClient>,
    cache: CacheContext,
    page_size: usize,
}

impl HierarchicalBackend {
    pub fn new(client: Arc<dyn DfsClient>, cache: CacheContext) -> Self {
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

    fn path_properties(&self, path: &str) -> BackendResult<Option<DfsProperties>> {
        match self.client.get_path_properties(path) {
            Ok(props) => Ok(Some(props)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(BackendError::remote("get_path_properties", path, e)),
        }
    }

    fn list_entry(item: DfsPathItem) -> ListEntry {
        let mode = item
            .permissions
            .as_deref()
            .map(|acl| acl_string_to_mode_or_zero(&item.name, acl));
        ListEntry {
            name: normalize_path(&item.name).to_string(),
            is_directory: item.is_directory,
            size: item.size,
            last_modified: item.last_modified,
            metadata: Metadata::new(),
            mode,
        }
    }
}

impl From<DfsProperties> for PathProperties {
    fn from(props: DfsProperties) -> Self {
        Self {
            size: props.size,
            last_modified: props.last_modified,
            content_md5: props.content_md5,
            etag: props.etag,
            metadata: props.metadata,
            resource_type: props.resource_type,
            permissions: props.permissions,
            owner: props.owner,
            group: props.group,
        }
    }
}

impl StorageBackend for HierarchicalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Hierarchical
    }

    #[instrument(level = "info", skip(self))]
    fn authenticate(&self) -> BackendResult<()> {
        self.client
            .list_paths("", false, None, 1)
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
        Ok(match self.path_properties(path)? {
            Some(props) if props.resource_type == ResourceType::Directory => PathKind::Directory,
            Some(_) => PathKind::File,
            None => PathKind::NotFound,
        })
    }

    #[instrument(level = "debug", skip(self))]
    fn create_directory(&self, path: &str) -> BackendResult<()> {
        let path = normalize_path(path);
        self.client
            .create_directory(path)
            .map_err(|e| BackendError::remote("create_directory", path, e))
    }

    #[instrument(level = "debug", skip(self))]
    fn delete_directory(&self, path: &str) -> BackendResult<()> {
        let path = normalize_path(path);
        match self.directory_state(path)? {
            DirectoryState::Missing => return Err(BackendError::not_found(path)),
            DirectoryState::NotEmpty => {
                return Err(BackendError::DirectoryNotEmpty {
                    path: path.to_string(),
                });
            }
            DirectoryState::Empty => {}
        }
        match self.client.delete_directory(path) {
            Ok(()) => Ok(()),
            // Something was created between the check and the delete.
            Err(e) if e.is_conflict() => Err(BackendError::DirectoryNotEmpty {
                path: path.to_string(),
            }),
            Err(e) => Err(BackendError::remote("delete_directory", path, e)),
        }
    }

    #[instrument(level = "debug", skip(self))]
    fn directory_state(&self, path: &str) -> BackendResult<DirectoryState> {
        let path = normalize_path(path);
        if !path.is_empty() {
            match self.path_properties(path)? {
                None => return Ok(DirectoryState::Missing),
                Some(props) if props.resource_type != ResourceType::Directory => {
                    return Err(BackendError::NotADirectory {
                        path: path.to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        let mut legacy_marker_seen = false;
        let mut continuation: Option<String> = None;
        loop {
            let listing = match self.client.list_paths(
                path,
                false,
                continuation.as_deref(),
                EMPTINESS_PROBE_SIZE,
            ) {
                Ok(listing) => listing,
                // Deleted between the two calls.
                Err(e) if e.is_not_found() => return Ok(DirectoryState::Missing),
                Err(e) => return Err(BackendError::remote("list_paths", path, e)),
            };

            for item in &listing.paths {
                if !legacy_marker_seen && !item.is_directory && is_legacy_marker(&item.name) {
                    legacy_marker_seen = true;
                    continue;
                }
                return Ok(DirectoryState::NotEmpty);
            }

            match listing.continuation {
                Some(token) if !token.is_empty() => continuation = Some(token),
                _ => return Ok(DirectoryState::Empty),
            }
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
        let directory = normalize_path(prefix);
        let listing = self
            .client
            .list_paths(directory, delimiter.is_none(), continuation, max_results)
            .map_err(|e| BackendError::remote("list_paths", directory, e))?;
        Ok(ListPage {
            entries: listing.paths.into_iter().map(Self::list_entry).collect(),
            continuation: listing.continuation.filter(|t| !t.is_empty()),
        })
    }

    #[instrument(level = "debug", skip(self))]
    fn get_properties(&self, path: &str, _type_known: bool) -> BackendResult<PathProperties> {
        let path = normalize_path(path);
        self.path_properties(path)?
            .map(PathProperties::from)
            .ok_or_else(|| BackendError::not_found(path))
    }

    /// One atomic move for files and whole directory trees alike.
    #[instrument(level = "info", skip(self))]
    fn rename(
        &self,
        source: &str,
        destination: &str,
        _is_directory: bool,
    ) -> BackendResult<Vec<String>> {
        let (source, destination) = (normalize_path(source), normalize_path(destination));
        let _guards = self.cache.locks.lock_pair(source, destination);

        self.client
            .move_path(source, destination)
            .map_err(|e| BackendError::remote("move_path", source, e))?;

        if let Err(e) = self.cache.layout.rename_cached(source, destination) {
            warn!(source, destination, error = %e, "failed to move cached copy after rename");
        }
        Ok(vec![destination.to_string()])
    }

    #[instrument(level = "debug", skip(self))]
    fn change_mode(&self, path: &str, mode: u32) -> BackendResult<()> {
        let path = normalize_path(path);
        self.client
            .set_access_control(path, &mode_to_acl_string(mode))
            .map_err(|e| BackendError::remote("set_access_control", path, e))?;

        if let Err(e) = self.update_property(path, LAST_CHANGE_KEY, &unix_seconds(SystemTime::now()))
        {
            warn!(path, error = %e, "failed to record change time");
        }

        let _guard = self.cache.locks.lock(path);
        if self.cache.layout.chmod_cached(path, mode)? {
            debug!(path, "updated mode of cached copy");
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    fn update_property(&self, path: &str, key: &str, value: &str) -> BackendResult<Metadata> {
        let path = normalize_path(path);
        let mut metadata = self
            .path_properties(path)?
            .ok_or_else(|| BackendError::not_found(path))?
            .metadata;
        if key.is_empty() || value.is_empty() {
            return Ok(metadata);
        }
        metadata.set(key, value);
        self.client
            .set_path_metadata(path, &metadata)
            .map_err(|e| BackendError::remote("set_path_metadata", path, e))?;
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
            .delete_file(path)
            .map_err(|e| BackendError::remote("delete_file", path, e))
    }

    #[instrument(level = "debug", skip(self))]
    fn copy(&self, source: &str, destination: &str) -> BackendResult<()> {
        let (source, destination) = (normalize_path(source), normalize_path(destination));
        self.client
            .copy_file(source, destination)
            .map_err(|e| BackendError::remote("copy_file", source, e))
    }

    /// Listings do not carry metadata on this namespace; fetch it separately.
    fn get_extra_properties(&self, path: &str, props: &mut PathProperties) -> BackendResult<()> {
        let path = normalize_path(path);
        let extra = self
            .path_properties(path)?
            .ok_or_else(|| BackendError::not_found(path))?;
        props.metadata = extra.metadata;
        props.permissions = extra.permissions;
        props.owner = extra.owner;
        props.group = extra.group;
        Ok(())
    }

    fn list_page_size(&self) -> usize {
        self.page_size
    }
}

impl std::fmt::Debug for HierarchicalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchicalBackend")
            .field("layout", &self.cache.layout)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
