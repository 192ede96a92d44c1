//! Interfaces of the remote-call collaborator.
//!
//! The HTTP client, request signing, credential refresh and retry policy all
//! live behind these traits. Each method is a single remote operation with a
//! definitive outcome: a typed result, or a [`RemoteError`] carrying the final
//! status. Paths are logical paths without a leading slash.

use std::path::Path;
use std::time::SystemTime;

use crate::error::RemoteError;
use crate::properties::{Metadata, ResourceType};

/// An object or common prefix returned by a blob listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobItem {
    /// Full object name; prefixes end with the delimiter.
    pub name: String,
    /// True for a common prefix ("virtual directory") entry.
    pub is_prefix: bool,
    pub size: u64,
    pub last_modified: Option<SystemTime>,
    pub etag: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobListing {
    pub items: Vec<BlobItem>,
    pub next_marker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProperties {
    pub size: u64,
    pub last_modified: SystemTime,
    pub etag: String,
    pub content_md5: Vec<u8>,
    pub metadata: Metadata,
}

/// Flat-namespace (blob container) operations.
pub trait BlobClient: Send + Sync {
    /// Lists objects whose names start with `prefix`.
    ///
    /// With a delimiter, names containing it past the prefix are rolled up
    /// into a single prefix item.
    fn list_blobs(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        marker: Option<&str>,
        max_results: usize,
    ) -> Result<BlobListing, RemoteError>;

    fn get_blob_properties(&self, name: &str) -> Result<BlobProperties, RemoteError>;

    fn put_blob(&self, name: &str, data: &[u8], metadata: &Metadata) -> Result<(), RemoteError>;

    fn upload_from_file(&self, name: &str, local: &Path, metadata: &Metadata)
    -> Result<(), RemoteError>;

    /// Writes the object to `local` and returns the number of bytes written.
    fn download_to_file(&self, name: &str, local: &Path) -> Result<u64, RemoteError>;

    fn delete_blob(&self, name: &str) -> Result<(), RemoteError>;

    /// Server-side copy, data and metadata included.
    fn copy_blob(&self, source: &str, destination: &str) -> Result<(), RemoteError>;

    fn set_blob_metadata(&self, name: &str, metadata: &Metadata) -> Result<(), RemoteError>;
}

/// A path returned by a hierarchical listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfsPathItem {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub last_modified: Option<SystemTime>,
    pub etag: String,
    pub permissions: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathListing {
    pub paths: Vec<DfsPathItem>,
    pub continuation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfsProperties {
    pub resource_type: ResourceType,
    pub size: u64,
    pub last_modified: SystemTime,
    pub etag: String,
    pub content_md5: Vec<u8>,
    pub metadata: Metadata,
    pub permissions: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

/// Hierarchical-namespace operations.
pub trait DfsClient: Send + Sync {
    fn create_directory(&self, path: &str) -> Result<(), RemoteError>;

    /// Deletes an empty directory. A non-empty one fails with status 409.
    fn delete_directory(&self, path: &str) -> Result<(), RemoteError>;

    fn get_path_properties(&self, path: &str) -> Result<DfsProperties, RemoteError>;

    /// Lists the children of `directory` (`""` is the container root), or
    /// every descendant when `recursive` is set.
    fn list_paths(
        &self,
        directory: &str,
        recursive: bool,
        continuation: Option<&str>,
        max_results: usize,
    ) -> Result<PathListing, RemoteError>;

    /// Atomically moves a file or a whole directory tree.
    fn move_path(&self, source: &str, destination: &str) -> Result<(), RemoteError>;

    fn set_access_control(&self, path: &str, acl: &str) -> Result<(), RemoteError>;

    fn set_path_metadata(&self, path: &str, metadata: &Metadata) -> Result<(), RemoteError>;

    fn upload_from_file(&self, path: &str, local: &Path, metadata: &Metadata)
    -> Result<(), RemoteError>;

    fn download_to_file(&self, path: &str, local: &Path) -> Result<u64, RemoteError>;

    fn delete_file(&self, path: &str) -> Result<(), RemoteError>;

    /// Server-side copy of a file (served by the blob endpoint of the account).
    fn copy_file(&self, source: &str, destination: &str) -> Result<(), RemoteError>;
}
