//! Shared fixtures for cache manager and service tests.

#![allow(dead_code)]

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use blobfs_core::layout::CacheLayout;
use blobfs_core::locks::PathLockRegistry;
use blobfs_core::testing::{MemoryBlobClient, MemoryDfsClient};
use blobfs_mount::{BackendSelection, BlobfsService, CacheManager, MountConfig, RemoteClient};
use tempfile::TempDir;

/// Default cache budget for tests, large enough that nothing triggers pressure.
pub const LARGE_BUDGET: u64 = 1 << 30;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Configuration with an explicit byte budget, so usage never depends on the
/// host filesystem.
pub fn config(tmp: &TempDir, budget: u64) -> MountConfig {
    let mut config = MountConfig::new(tmp.path());
    config.cache_size_bytes = Some(budget);
    config.file_cache_timeout = Duration::from_secs(120);
    config
}

pub struct ManagerFixture {
    pub manager: CacheManager,
    pub locks: Arc<PathLockRegistry>,
    pub tmp: TempDir,
}

impl ManagerFixture {
    /// Writes a cached copy of `path` with `size` bytes.
    pub fn cache_file(&self, path: &str, size: usize) {
        let layout = self.manager.layout();
        let local = layout.local_path(path);
        layout.ensure_parent_dirs(&local).expect("create parent dirs");
        fs::write(local, vec![7u8; size]).expect("write cached copy");
    }
}

pub fn manager(budget: u64) -> ManagerFixture {
    let tmp = TempDir::new().expect("create temp cache root");
    let config = config(&tmp, budget);
    let locks = Arc::new(PathLockRegistry::new());
    let layout = CacheLayout::new(tmp.path(), config.default_permission);
    ManagerFixture {
        manager: CacheManager::new(&config, layout, Arc::clone(&locks)),
        locks,
        tmp,
    }
}

pub struct FlatService {
    pub service: BlobfsService,
    pub client: Arc<MemoryBlobClient>,
    pub tmp: TempDir,
}

pub struct HierarchicalService {
    pub service: BlobfsService,
    pub client: Arc<MemoryDfsClient>,
    pub tmp: TempDir,
}

pub fn flat_service_with(tweak: impl FnOnce(&mut MountConfig)) -> FlatService {
    let tmp = TempDir::new().expect("create temp cache root");
    let mut config = config(&tmp, LARGE_BUDGET);
    tweak(&mut config);
    let client = Arc::new(MemoryBlobClient::new());
    let service = BlobfsService::new(config, RemoteClient::Blob(client.clone()))
        .expect("build flat service");
    service.layout().ensure_tree_root().expect("create cache tree");
    FlatService {
        service,
        client,
        tmp,
    }
}

pub fn flat_service() -> FlatService {
    flat_service_with(|_| {})
}

pub fn hierarchical_service() -> HierarchicalService {
    let tmp = TempDir::new().expect("create temp cache root");
    let mut config = config(&tmp, LARGE_BUDGET);
    config.backend = BackendSelection::Hierarchical;
    let client = Arc::new(MemoryDfsClient::new());
    let service = BlobfsService::new(config, RemoteClient::Dfs(client.clone()))
        .expect("build hierarchical service");
    service.layout().ensure_tree_root().expect("create cache tree");
    HierarchicalService {
        service,
        client,
        tmp,
    }
}
