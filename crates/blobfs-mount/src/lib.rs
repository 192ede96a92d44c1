//! Local cache management for blobfs mounts.
//!
//! Builds on `blobfs-core`:
//!
//! - [`config`]: the mount configuration file.
//! - [`gc`]: the cache manager that evicts cached copies by age and under
//!   disk pressure, with its background reclaim thread.
//! - [`service`]: wires backend, cache manager and lock registry together
//!   for the filesystem front end.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use blobfs_core::testing::MemoryBlobClient;
//! use blobfs_mount::{BlobfsService, MountConfig, RemoteClient};
//!
//! let tmp = tempfile::TempDir::new().unwrap();
//! let client = Arc::new(MemoryBlobClient::new());
//! client.insert("notes.txt", b"hello", Default::default());
//!
//! let mut config = MountConfig::new(tmp.path());
//! config.cache_size_bytes = Some(1 << 20);
//!
//! let service = BlobfsService::new(config, RemoteClient::Blob(client)).unwrap();
//! service.start().unwrap();
//!
//! let local = service.open_file("/notes.txt").unwrap();
//! assert_eq!(std::fs::read(&local).unwrap(), b"hello");
//! service.close_file("/notes.txt", false).unwrap();
//! assert!(service.cache().is_queued("notes.txt"));
//!
//! service.shutdown();
//! ```

pub mod config;
pub mod disk;
pub mod error;
pub mod gc;
pub mod service;
pub mod stats;

pub use config::{BackendSelection, ConfigError, MountConfig};
pub use error::{CacheError, CacheResult};
pub use gc::{CacheManager, CachedFileRecord, ReclaimReport};
pub use service::{BlobfsService, RemoteClient};
pub use stats::{CacheStats, CacheStatsSnapshot};
