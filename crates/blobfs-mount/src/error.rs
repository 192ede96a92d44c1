//! Errors of the cache manager and the service layer.

use std::io;
use std::path::PathBuf;

use blobfs_core::error::{BackendError, ErrorCategory, io_error_category, io_error_to_errno};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors from the local cache and the operations built on it.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to query disk usage of {}: {source}", path.display())]
    DiskUsage {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("Cache disk usage is over the threshold, refusing to cache '{path}'")]
    ThresholdReached { path: String },

    #[error("Failed to start the reclaim worker: {0}")]
    WorkerSpawn(#[source] io::Error),

    #[error("The reclaim worker is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result alias for cache and service operations.
pub type CacheResult<T> = Result<T, CacheError>;

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io { source, .. } => io_error_category(source),
            Self::DiskUsage { .. } | Self::WorkerSpawn(_) => ErrorCategory::TransientIo,
            Self::ThresholdReached { .. } => ErrorCategory::ResourceExhausted,
            Self::AlreadyRunning | Self::Config(_) => ErrorCategory::Unknown,
            Self::Backend(e) => e.category(),
        }
    }

    /// Converts this error to the POSIX errno returned to the kernel.
    pub fn to_errno(&self) -> i32 {
        match self {
            Self::Io { source, .. } => io_error_to_errno(source),
            Self::DiskUsage { source, .. } => *source as i32,
            Self::ThresholdReached { .. } => libc::ENOSPC,
            Self::WorkerSpawn(source) => io_error_to_errno(source),
            Self::AlreadyRunning | Self::Config(_) => libc::EINVAL,
            Self::Backend(e) => e.to_errno(),
        }
    }
}
