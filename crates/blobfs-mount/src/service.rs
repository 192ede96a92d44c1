//! Top-level wiring handed to the filesystem front end.
//!
//! [`BlobfsService`] owns the lock registry and shares it with the backend
//! and the cache manager, so that every component serializes on the same
//! per-path locks. The file-level operations here implement the cache
//! protocol around the backend calls:
//!
//! - `open_file`: primary lock, download on a miss or a stale copy, then
//!   register the handle (which cancels a pending eviction).
//! - `close_file`: upload when dirty under the delay lock, then release the
//!   handle under the primary lock and queue the copy once none is left.
//! - `unlink_file`: remote delete, then force-evict the cached copy.
//! - `rename`: backend rename, then re-queue the moved cached copies. This
//!   also runs when the rename failed part way.

use std::fs::{self, Metadata as FileMetadata};
use std::path::PathBuf;
use std::sync::Arc;

use blobfs_core::backend::{
    BackendKind, CacheContext, CachedBackend, FlatBackend, HierarchicalBackend, StorageBackend,
};
use blobfs_core::layout::{CacheLayout, normalize_path};
use blobfs_core::locks::PathLockRegistry;
use blobfs_core::properties::Metadata;
use blobfs_core::remote::{BlobClient, DfsClient};
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfigError, MountConfig};
use crate::error::{CacheError, CacheResult};
use crate::gc::CacheManager;

/// Remote client matching the configured backend variant.
#[derive(Clone)]
pub enum RemoteClient {
    Blob(Arc<dyn BlobClient>),
    Dfs(Arc<dyn DfsClient>),
}

impl RemoteClient {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Blob(_) => BackendKind::Flat,
            Self::Dfs(_) => BackendKind::Hierarchical,
        }
    }
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RemoteClient").field(&self.kind()).finish()
    }
}

/// Backend, cache manager and lock registry of one mount.
pub struct BlobfsService {
    config: MountConfig,
    locks: Arc<PathLockRegistry>,
    layout: CacheLayout,
    backend: Arc<dyn StorageBackend>,
    cache: Arc<CacheManager>,
}

impl BlobfsService {
    /// Builds the backend selected by `config.backend` on top of `client`.
    ///
    /// Nothing touches the network or the cache directory until
    /// [`start`](Self::start).
    pub fn new(config: MountConfig, client: RemoteClient) -> CacheResult<Self> {
        config.validate()?;

        let locks = Arc::new(PathLockRegistry::new());
        let layout = CacheLayout::new(&config.cache_root, config.default_permission);
        let context = CacheContext::new(Arc::clone(&locks), layout.clone());

        let mut backend: Arc<dyn StorageBackend> = match (config.backend.kind(), client) {
            (BackendKind::Flat, RemoteClient::Blob(client)) => Arc::new(
                FlatBackend::new(client, context).with_list_page_size(config.list_page_size),
            ),
            (BackendKind::Hierarchical, RemoteClient::Dfs(client)) => Arc::new(
                HierarchicalBackend::new(client, context)
                    .with_list_page_size(config.list_page_size),
            ),
            (selected, client) => {
                return Err(ConfigError::Invalid {
                    field: "backend",
                    reason: format!("{selected} backend cannot use a {} client", client.kind()),
                }
                .into());
            }
        };
        if let Some(ttl) = config.attr_cache_timeout {
            backend = Arc::new(CachedBackend::new(backend, ttl));
        }

        let cache = Arc::new(CacheManager::new(&config, layout.clone(), Arc::clone(&locks)));

        Ok(Self {
            config,
            locks,
            layout,
            backend,
            cache,
        })
    }

    /// Authenticates the backend, prepares the cache tree and starts the
    /// reclaimer.
    #[instrument(level = "info", skip(self), fields(backend = %self.backend.kind()))]
    pub fn start(&self) -> CacheResult<()> {
        self.backend.authenticate()?;
        self.layout.ensure_tree_root()?;
        self.cache.start()?;
        info!(
            cache_root = %self.layout.cache_root().display(),
            max_concurrency = self.config.max_concurrency,
            "blobfs service started"
        );
        Ok(())
    }

    pub fn shutdown(&self) {
        self.cache.shutdown();
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn locks(&self) -> &Arc<PathLockRegistry> {
        &self.locks
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Makes sure a fresh cached copy of `path` exists, registers an open
    /// handle on it and returns its local path.
    ///
    /// A copy older than `file_cache_timeout` is downloaded again unless
    /// another handle has it open. New downloads are refused while cache usage
    /// is over the threshold.
    #[instrument(level = "debug", skip(self))]
    pub fn open_file(&self, path: &str) -> CacheResult<PathBuf> {
        let path = normalize_path(path);
        let _guard = self.locks.lock(path);

        let local = self.layout.local_path(path);
        match fs::metadata(&local) {
            Ok(meta) if meta.is_file() => {
                if !self.is_stale(path, &meta) {
                    self.cache.open_handle(path);
                    return Ok(local);
                }
                debug!(path, "cached copy expired, downloading again");
                self.layout.remove_cached(path)?;
                self.cache.forget(path);
            }
            _ => {}
        }
        if self.cache.threshold_reached() {
            return Err(CacheError::ThresholdReached {
                path: path.to_string(),
            });
        }

        let size = match self.backend.download_file(path, &local) {
            Ok(size) => size,
            Err(e) => {
                // Never serve a partial download to a later open.
                if let Err(cleanup) = self.layout.remove_cached(path) {
                    warn!(path, error = %cleanup, "failed to remove partial download");
                }
                return Err(e.into());
            }
        };
        self.cache.add_cache_bytes(path, size);
        self.cache.open_handle(path);
        debug!(path, size, "populated cached copy");
        Ok(local)
    }

    fn is_stale(&self, path: &str, meta: &FileMetadata) -> bool {
        self.cache.open_handles(path) == 0
            && meta
                .modified()
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age >= self.config.file_cache_timeout)
    }

    /// Creates an empty cached file for a new remote file and registers an
    /// open handle on it.
    ///
    /// The remote object is written by the first dirty [`close_file`](Self::close_file).
    #[instrument(level = "debug", skip(self))]
    pub fn create_file(&self, path: &str) -> CacheResult<PathBuf> {
        let path = normalize_path(path);
        let _guard = self.locks.lock(path);

        let local = self.layout.local_path(path);
        self.layout.ensure_parent_dirs(&local)?;
        fs::File::create(&local).map_err(|e| CacheError::io(&local, e))?;
        self.cache.add_cache_bytes(path, 0);
        self.cache.open_handle(path);
        Ok(local)
    }

    /// Uploads a modified cached copy and releases one open handle. The copy
    /// is queued for eviction once the last handle is closed.
    ///
    /// A failed upload is returned after the copy has been queued, so the
    /// cached copy stays tracked either way.
    #[instrument(level = "debug", skip(self))]
    pub fn close_file(&self, path: &str, dirty: bool) -> CacheResult<()> {
        let path = normalize_path(path);
        let local = self.layout.local_path(path);

        let uploaded = if dirty {
            let _delay = self.locks.lock_delay(path);
            self.backend.upload_file(path, &local, &Metadata::new())
        } else {
            Ok(())
        };
        if let Err(e) = &uploaded {
            warn!(path, error = %e, "upload failed on close");
        }

        let _guard = self.locks.lock(path);
        let queued = if self.cache.release_handle(path) {
            fs::metadata(&local)
                .map(|meta| self.cache.record_closed(path, meta.len(), false))
                .map_err(|e| CacheError::io(&local, e))
        } else {
            Ok(())
        };
        uploaded?;
        queued
    }

    /// Deletes the remote file and schedules its cached copy for removal.
    #[instrument(level = "debug", skip(self))]
    pub fn unlink_file(&self, path: &str) -> CacheResult<()> {
        let path = normalize_path(path);
        self.backend.delete_file(path)?;

        let _guard = self.locks.lock(path);
        match fs::metadata(self.layout.local_path(path)) {
            Ok(meta) => self.cache.record_closed(path, meta.len(), true),
            Err(_) => {
                self.cache.cancel_pending_eviction(path);
            }
        }
        Ok(())
    }

    /// Renames on the remote side and re-queues the moved cached copies.
    ///
    /// When the backend fails part way, the cache is reconciled with whatever
    /// was moved before the error is returned.
    ///
    /// Returns the destination paths reported by the backend.
    #[instrument(level = "info", skip(self))]
    pub fn rename(
        &self,
        source: &str,
        destination: &str,
        is_directory: bool,
    ) -> CacheResult<Vec<String>> {
        let result = self.backend.rename(source, destination, is_directory);
        self.cache.forget_moved(source, destination);

        let targets = match &result {
            Ok(affected) => affected.clone(),
            Err(e) => {
                warn!(source, destination, error = %e, "rename failed, reconciling moved copies");
                vec![normalize_path(destination).to_string()]
            }
        };
        let requeued = self.requeue_cached(&targets);

        let affected = result?;
        let requeued = requeued?;
        debug!(source, destination, affected = affected.len(), requeued, "renamed");
        Ok(affected)
    }

    /// Force-queues every cached file under `targets`.
    fn requeue_cached(&self, targets: &[String]) -> CacheResult<usize> {
        let mut requeued = 0;
        for target in targets {
            for (file, size) in self.layout.cached_files(target)? {
                let _guard = self.locks.lock(&file);
                self.cache.record_closed(&file, size, true);
                requeued += 1;
            }
        }
        Ok(requeued)
    }
}

impl std::fmt::Debug for BlobfsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobfsService")
            .field("backend", &self.backend.kind())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Drop for BlobfsService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
