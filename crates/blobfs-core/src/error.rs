//! Error translation between the remote store and POSIX.
//!
//! Every failure that leaves the backend layer is classified exactly once:
//!
//! - Remote failures carry the status reported by the remote client and are
//!   translated with [`map_error`], a fixed status → errno table.
//! - Local cache I/O failures keep the raw OS error when one is available.
//! - Backend-level conditions (non-empty directory, wrong resource type, ...)
//!   have their own variants with a fixed errno.
//!
//! [`ErrorCategory`] is the coarse taxonomy the Filesystem Front and the logs
//! work with; `to_errno()` is what is finally returned to the kernel.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::LazyLock;

use thiserror::Error;
use tracing::info;

/// Status used by the remote client for failures it could not attribute to a
/// concrete HTTP response.
pub const UNKNOWN_REMOTE_STATUS: i32 = 1600;

/// Status reported when the remote store refuses a mutation because of the
/// current state of the target (for example deleting a non-empty directory).
pub const CONFLICT_STATUS: i32 = 409;

static ERROR_MAPPING: LazyLock<HashMap<i32, i32>> = LazyLock::new(|| {
    HashMap::from([
        (404, libc::ENOENT),
        (403, libc::EACCES),
        (UNKNOWN_REMOTE_STATUS, libc::ENOENT),
    ])
});

/// Maps a remote status code to a POSIX errno.
///
/// Unmapped statuses are reported as `EIO`; the original status is logged so
/// the failure can still be diagnosed.
pub fn map_error(status: i32) -> i32 {
    if let Some(errno) = ERROR_MAPPING.get(&status) {
        *errno
    } else {
        info!(status, "failed to map storage status to an errno, returning EIO");
        libc::EIO
    }
}

/// Semantic category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The path does not exist.
    NotFound,
    /// The caller is not allowed to perform the operation.
    PermissionDenied,
    /// The path exists in a state that forbids the operation (non-empty
    /// directory, wrong resource type, already exists).
    Conflict,
    /// The remote store returned data that could not be interpreted.
    MalformedRemoteData,
    /// Local resources (disk, cache budget) are exhausted.
    ResourceExhausted,
    /// A network or service failure that the remote client gave up on.
    TransientIo,
    /// The backend variant has no way to express the operation.
    NotSupported,
    /// Anything else.
    Unknown,
}

impl ErrorCategory {
    /// Errno used when nothing more specific is known about a failure.
    pub fn default_errno(self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::PermissionDenied => libc::EACCES,
            Self::Conflict => libc::EEXIST,
            Self::ResourceExhausted => libc::ENOSPC,
            Self::NotSupported => libc::ENOSYS,
            Self::MalformedRemoteData | Self::TransientIo | Self::Unknown => libc::EIO,
        }
    }

    /// Returns a human-readable name for this category.
    pub fn name(self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::PermissionDenied => "PermissionDenied",
            Self::Conflict => "Conflict",
            Self::MalformedRemoteData => "MalformedRemoteData",
            Self::ResourceExhausted => "ResourceExhausted",
            Self::TransientIo => "TransientIo",
            Self::NotSupported => "NotSupported",
            Self::Unknown => "Unknown",
        }
    }
}

/// Failure reported by the remote-call collaborator.
///
/// The remote client owns retries; by the time one of these reaches the
/// backend the outcome is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("remote status {status}: {message}")]
pub struct RemoteError {
    /// HTTP status, or [`UNKNOWN_REMOTE_STATUS`].
    pub status: i32,
    /// Service error code (e.g. `BlobNotFound`), when the response had one.
    pub code: Option<String>,
    /// Free-form description for logs.
    pub message: String,
}

impl RemoteError {
    pub fn new(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    /// True when the status means "no such path".
    pub fn is_not_found(&self) -> bool {
        matches!(self.status, 404 | UNKNOWN_REMOTE_STATUS)
    }

    pub fn is_conflict(&self) -> bool {
        self.status == CONFLICT_STATUS
    }

    /// Classifies the status without logging.
    pub fn category(&self) -> ErrorCategory {
        match self.status {
            404 | UNKNOWN_REMOTE_STATUS => ErrorCategory::NotFound,
            401 | 403 => ErrorCategory::PermissionDenied,
            CONFLICT_STATUS | 412 => ErrorCategory::Conflict,
            408 | 429 | 500..=599 => ErrorCategory::TransientIo,
            _ => ErrorCategory::Unknown,
        }
    }
}

/// Result alias used throughout the backend layer.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors returned by storage backends.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{op} '{path}' failed: {source}")]
    Remote {
        op: &'static str,
        path: String,
        #[source]
        source: RemoteError,
    },

    #[error("Path not found: '{path}'")]
    NotFound { path: String },

    #[error("Directory not empty: '{path}'")]
    DirectoryNotEmpty { path: String },

    #[error("Path already exists: '{path}'")]
    AlreadyExists { path: String },

    #[error("Expected directory but found file: '{path}'")]
    NotADirectory { path: String },

    #[error("Malformed {what} for '{path}': {reason}")]
    MalformedData {
        path: String,
        what: &'static str,
        reason: String,
    },

    #[error("Local cache I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Authentication against the storage container failed: {reason}")]
    Authentication { reason: String },

    #[error("{op} is not supported by the {backend} backend")]
    NotSupported {
        op: &'static str,
        backend: &'static str,
    },
}

impl BackendError {
    pub fn remote(op: &'static str, path: impl Into<String>, source: RemoteError) -> Self {
        Self::Remote {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Remote { source, .. } => source.category(),
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::DirectoryNotEmpty { .. }
            | Self::AlreadyExists { .. }
            | Self::NotADirectory { .. } => ErrorCategory::Conflict,
            Self::MalformedData { .. } => ErrorCategory::MalformedRemoteData,
            Self::Io { source, .. } => io_error_category(source),
            Self::Authentication { .. } => ErrorCategory::PermissionDenied,
            Self::NotSupported { .. } => ErrorCategory::NotSupported,
        }
    }

    /// True when the failure means the path does not exist.
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    /// Converts this error to the POSIX errno returned to the kernel.
    pub fn to_errno(&self) -> i32 {
        match self {
            Self::Remote { source, .. } => map_error(source.status),
            Self::NotFound { .. } => libc::ENOENT,
            Self::DirectoryNotEmpty { .. } => libc::ENOTEMPTY,
            Self::AlreadyExists { .. } => libc::EEXIST,
            Self::NotADirectory { .. } => libc::ENOTDIR,
            Self::MalformedData { .. } => libc::EIO,
            Self::Io { source, .. } => io_error_to_errno(source),
            Self::Authentication { .. } => libc::EACCES,
            Self::NotSupported { .. } => libc::ENOSYS,
        }
    }
}

/// Categorizes an I/O error based on its kind.
pub fn io_error_category(e: &io::Error) -> ErrorCategory {
    match e.kind() {
        io::ErrorKind::NotFound => ErrorCategory::NotFound,
        io::ErrorKind::PermissionDenied => ErrorCategory::PermissionDenied,
        io::ErrorKind::AlreadyExists
        | io::ErrorKind::DirectoryNotEmpty
        | io::ErrorKind::NotADirectory
        | io::ErrorKind::IsADirectory => ErrorCategory::Conflict,
        io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded | io::ErrorKind::OutOfMemory => {
            ErrorCategory::ResourceExhausted
        }
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            ErrorCategory::TransientIo
        }
        io::ErrorKind::Unsupported => ErrorCategory::NotSupported,
        _ => ErrorCategory::Unknown,
    }
}

/// Converts an I/O error to a POSIX errno value.
///
/// This extracts the raw OS error if available, otherwise falls back to the
/// category's errno.
#[inline]
pub fn io_error_to_errno(e: &io::Error) -> i32 {
    e.raw_os_error()
        .unwrap_or_else(|| io_error_category(e).default_errno())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapped_statuses() {
        assert_eq!(map_error(404), libc::ENOENT);
        assert_eq!(map_error(403), libc::EACCES);
        assert_eq!(map_error(UNKNOWN_REMOTE_STATUS), libc::ENOENT);
    }

    #[test]
    fn test_unmapped_status_is_eio() {
        assert_eq!(map_error(999_999), libc::EIO);
        assert_eq!(map_error(500), libc::EIO);
        assert_eq!(map_error(CONFLICT_STATUS), libc::EIO);
    }

    #[test]
    fn test_remote_error_categories() {
        assert_eq!(RemoteError::not_found("x").category(), ErrorCategory::NotFound);
        assert_eq!(RemoteError::new(403, "x").category(), ErrorCategory::PermissionDenied);
        assert_eq!(RemoteError::new(409, "x").category(), ErrorCategory::Conflict);
        assert_eq!(RemoteError::new(503, "x").category(), ErrorCategory::TransientIo);
        assert_eq!(RemoteError::new(418, "x").category(), ErrorCategory::Unknown);
    }

    #[test]
    fn test_backend_remote_error_uses_table() {
        let err = BackendError::remote("exists", "a/b", RemoteError::new(403, "denied"));
        assert_eq!(err.to_errno(), libc::EACCES);
        assert_eq!(err.category(), ErrorCategory::PermissionDenied);

        let err = BackendError::remote("exists", "a/b", RemoteError::new(502, "bad gateway"));
        assert_eq!(err.to_errno(), libc::EIO);
        assert_eq!(err.category(), ErrorCategory::TransientIo);
    }

    #[test]
    fn test_non_empty_directory_is_conflict() {
        let err = BackendError::DirectoryNotEmpty {
            path: "a/b".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Conflict);
        assert_eq!(err.to_errno(), libc::ENOTEMPTY);
    }

    #[test]
    fn test_io_error_keeps_raw_os_error() {
        let err = BackendError::io("/tmp/x", io::Error::from_raw_os_error(libc::ENOSPC));
        assert_eq!(err.to_errno(), libc::ENOSPC);
        assert_eq!(err.category(), ErrorCategory::ResourceExhausted);
    }

    #[test]
    fn test_io_error_without_os_code() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(io_error_to_errno(&err), libc::ENOENT);

        let err = io::Error::other("weird");
        assert_eq!(io_error_to_errno(&err), libc::EIO);
    }

    #[test]
    fn test_category_names() {
        assert_eq!(ErrorCategory::NotFound.name(), "NotFound");
        assert_eq!(ErrorCategory::MalformedRemoteData.name(), "MalformedRemoteData");
    }
}
