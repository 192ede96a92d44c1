//! Core of a filesystem view over a remote object store.
//!
//! This crate holds the pieces that do not depend on how the filesystem is
//! mounted:
//!
//! - [`error`]: remote status → errno translation and the backend error type.
//! - [`acl`]: conversion between POSIX modes and 9-character ACL strings.
//! - [`locks`]: the per-path lock registry.
//! - [`layout`]: where cached copies live on local disk.
//! - [`backend`]: the storage contract and its flat and hierarchical variants.
//! - [`remote`]: the interfaces of the remote-call client the backends drive.
//!
//! The cache manager and the service wiring live in `blobfs-mount`.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use blobfs_core::backend::{CacheContext, FlatBackend, StorageBackend};
//! use blobfs_core::layout::CacheLayout;
//! use blobfs_core::locks::PathLockRegistry;
//! use blobfs_core::properties::PathKind;
//! use blobfs_core::testing::MemoryBlobClient;
//!
//! let cache = CacheContext::new(
//!     Arc::new(PathLockRegistry::new()),
//!     CacheLayout::new("/tmp/blobfs-doc", 0o770),
//! );
//! let backend = FlatBackend::new(Arc::new(MemoryBlobClient::new()), cache);
//!
//! backend.create_directory("photos").unwrap();
//! assert_eq!(backend.exists("photos").unwrap(), PathKind::Directory);
//! assert!(backend.is_directory_empty("photos").unwrap());
//! ```

pub mod acl;
pub mod backend;
pub mod error;
pub mod layout;
pub mod locks;
pub mod properties;
pub mod remote;
pub mod testing;

pub use acl::{acl_string_to_mode, mode_to_acl_string};
pub use backend::{BackendKind, CacheContext, StorageBackend};
pub use error::{BackendError, BackendResult, ErrorCategory, RemoteError, map_error};
pub use layout::CacheLayout;
pub use locks::{LockSpace, PathLock, PathLockGuard, PathLockRegistry};
pub use properties::{DirectoryState, PathKind, PathProperties};
