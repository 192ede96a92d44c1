use std::collections::BTreeMap;
use std::fs;
use std::ops::Bound;
use std::path::Path;
use std::time::SystemTime;

use parking_lot::Mutex;

use super::{CallLog, FaultPlan};
use crate::error::RemoteError;
use crate::properties::Metadata;
use crate::remote::{BlobClient, BlobItem, BlobListing, BlobProperties};

/// One object of a [`MemoryBlobClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub data: Vec<u8>,
    pub metadata: Metadata,
    pub last_modified: SystemTime,
    pub etag: String,
}

/// Flat blob container kept in a sorted map.
#[derive(Debug, Default)]
pub struct MemoryBlobClient {
    objects: Mutex<BTreeMap<String, StoredBlob>>,
    log: CallLog,
    next_etag: Mutex<u64>,
}

impl MemoryBlobClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn etag(&self) -> String {
        let mut next = self.next_etag.lock();
        *next += 1;
        format!("\"0x{:X}\"", *next)
    }

    /// Stores an object directly, bypassing counters and faults.
    pub fn insert(&self, name: &str, data: &[u8], metadata: Metadata) {
        let blob = StoredBlob {
            data: data.to_vec(),
            metadata,
            last_modified: SystemTime::now(),
            etag: self.etag(),
        };
        self.objects.lock().insert(name.to_string(), blob);
    }

    pub fn object(&self, name: &str) -> Option<StoredBlob> {
        self.objects.lock().get(name).cloned()
    }

    /// Sorted names of every stored object.
    pub fn names(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    /// Number of calls made to `op` since creation or the last reset.
    pub fn calls(&self, op: &str) -> usize {
        self.log.calls(op)
    }

    pub fn reset_calls(&self) {
        self.log.reset();
    }

    pub fn set_faults(&self, plan: FaultPlan) {
        self.log.set_faults(plan);
    }

    fn not_found(name: &str) -> RemoteError {
        RemoteError::not_found(format!("blob '{name}' not found")).with_code("BlobNotFound")
    }
}

impl BlobClient for MemoryBlobClient {
    fn list_blobs(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        marker: Option<&str>,
        max_results: usize,
    ) -> Result<BlobListing, RemoteError> {
        self.log.enter("list_blobs")?;
        let objects = self.objects.lock();
        let mut listing = BlobListing::default();
        let mut last_prefix: Option<String> = None;

        let range = objects.range::<str, _>((Bound::Included(prefix), Bound::Unbounded));
        for (name, blob) in range {
            if !name.starts_with(prefix) {
                break;
            }
            if let Some(marker) = marker {
                let inside_marker_prefix = delimiter.is_some_and(|d| marker.ends_with(d))
                    && name.starts_with(marker);
                if name.as_str() <= marker || inside_marker_prefix {
                    continue;
                }
            }

            let rolled_up = delimiter.and_then(|d| {
                let rest = &name[prefix.len()..];
                rest.find(d)
                    .map(|i| format!("{prefix}{}", &rest[..i + d.len()]))
            });
            if let Some(common) = &rolled_up
                && last_prefix.as_ref() == Some(common)
            {
                continue;
            }

            if listing.items.len() == max_results {
                listing.next_marker = listing.items.last().map(|item| item.name.clone());
                break;
            }

            match rolled_up {
                Some(common) => {
                    last_prefix = Some(common.clone());
                    listing.items.push(BlobItem {
                        name: common,
                        is_prefix: true,
                        size: 0,
                        last_modified: None,
                        etag: String::new(),
                        metadata: Metadata::new(),
                    });
                }
                None => listing.items.push(BlobItem {
                    name: name.clone(),
                    is_prefix: false,
                    size: blob.data.len() as u64,
                    last_modified: Some(blob.last_modified),
                    etag: blob.etag.clone(),
                    metadata: blob.metadata.clone(),
                }),
            }
        }
        Ok(listing)
    }

    fn get_blob_properties(&self, name: &str) -> Result<BlobProperties, RemoteError> {
        self.log.enter("get_blob_properties")?;
        let objects = self.objects.lock();
        let blob = objects.get(name).ok_or_else(|| Self::not_found(name))?;
        Ok(BlobProperties {
            size: blob.data.len() as u64,
            last_modified: blob.last_modified,
            etag: blob.etag.clone(),
            content_md5: Vec::new(),
            metadata: blob.metadata.clone(),
        })
    }

    fn put_blob(&self, name: &str, data: &[u8], metadata: &Metadata) -> Result<(), RemoteError> {
        self.log.enter("put_blob")?;
        self.insert(name, data, metadata.clone());
        Ok(())
    }

    fn upload_from_file(
        &self,
        name: &str,
        local: &Path,
        metadata: &Metadata,
    ) -> Result<(), RemoteError> {
        self.log.enter("upload_from_file")?;
        let data = fs::read(local).map_err(|e| {
            RemoteError::new(crate::error::UNKNOWN_REMOTE_STATUS, e.to_string())
        })?;
        self.insert(name, &data, metadata.clone());
        Ok(())
    }

    fn download_to_file(&self, name: &str, local: &Path) -> Result<u64, RemoteError> {
        self.log.enter("download_to_file")?;
        let data = self
            .objects
            .lock()
            .get(name)
            .map(|blob| blob.data.clone())
            .ok_or_else(|| Self::not_found(name))?;
        fs::write(local, &data).map_err(|e| {
            RemoteError::new(crate::error::UNKNOWN_REMOTE_STATUS, e.to_string())
        })?;
        Ok(data.len() as u64)
    }

    fn delete_blob(&self, name: &str) -> Result<(), RemoteError> {
        self.log.enter("delete_blob")?;
        self.objects
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(name))
    }

    fn copy_blob(&self, source: &str, destination: &str) -> Result<(), RemoteError> {
        self.log.enter("copy_blob")?;
        let mut objects = self.objects.lock();
        let mut blob = objects
            .get(source)
            .cloned()
            .ok_or_else(|| Self::not_found(source))?;
        blob.last_modified = SystemTime::now();
        objects.insert(destination.to_string(), blob);
        Ok(())
    }

    fn set_blob_metadata(&self, name: &str, metadata: &Metadata) -> Result<(), RemoteError> {
        self.log.enter("set_blob_metadata")?;
        let mut objects = self.objects.lock();
        let blob = objects.get_mut(name).ok_or_else(|| Self::not_found(name))?;
        blob.metadata = metadata.clone();
        Ok(())
    }
}
