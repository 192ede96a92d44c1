//! Shared fixtures for backend integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use blobfs_core::backend::{CacheContext, FlatBackend, HierarchicalBackend};
use blobfs_core::layout::CacheLayout;
use blobfs_core::locks::PathLockRegistry;
use blobfs_core::testing::{MemoryBlobClient, MemoryDfsClient};
use tempfile::TempDir;

pub struct FlatFixture {
    pub backend: FlatBackend,
    pub client: Arc<MemoryBlobClient>,
    pub layout: CacheLayout,
    pub locks: Arc<PathLockRegistry>,
    _tmp: TempDir,
}

pub struct HierarchicalFixture {
    pub backend: HierarchicalBackend,
    pub client: Arc<MemoryDfsClient>,
    pub layout: CacheLayout,
    pub locks: Arc<PathLockRegistry>,
    _tmp: TempDir,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn context() -> (CacheContext, TempDir) {
    let tmp = TempDir::new().expect("create temp cache root");
    let layout = CacheLayout::new(tmp.path(), 0o770);
    (CacheContext::new(Arc::new(PathLockRegistry::new()), layout), tmp)
}

pub fn flat() -> FlatFixture {
    let (cache, tmp) = context();
    let client = Arc::new(MemoryBlobClient::new());
    FlatFixture {
        layout: cache.layout.clone(),
        locks: Arc::clone(&cache.locks),
        backend: FlatBackend::new(client.clone(), cache),
        client,
        _tmp: tmp,
    }
}

pub fn hierarchical() -> HierarchicalFixture {
    let (cache, tmp) = context();
    let client = Arc::new(MemoryDfsClient::new());
    HierarchicalFixture {
        layout: cache.layout.clone(),
        locks: Arc::clone(&cache.locks),
        backend: HierarchicalBackend::new(client.clone(), cache),
        client,
        _tmp: tmp,
    }
}
