use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use parking_lot::Mutex;

use super::{CallLog, FaultPlan};
use crate::error::{CONFLICT_STATUS, RemoteError, UNKNOWN_REMOTE_STATUS};
use crate::layout::{directory_prefix, parent_path, rebase_path};
use crate::properties::{Metadata, ResourceType};
use crate::remote::{DfsClient, DfsPathItem, DfsProperties, PathListing};

/// ACL given to directories created without an explicit one.
pub const DEFAULT_DIRECTORY_ACL: &str = "rwxr-x---";

/// ACL given to files created without an explicit one.
pub const DEFAULT_FILE_ACL: &str = "rw-r-----";

/// One path of a [`MemoryDfsClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfsNode {
    pub is_directory: bool,
    pub data: Vec<u8>,
    pub metadata: Metadata,
    pub acl: String,
    pub owner: String,
    pub group: String,
    pub last_modified: SystemTime,
}

impl DfsNode {
    fn directory() -> Self {
        Self {
            is_directory: true,
            data: Vec::new(),
            metadata: Metadata::new(),
            acl: DEFAULT_DIRECTORY_ACL.to_string(),
            owner: "$superuser".to_string(),
            group: "$superuser".to_string(),
            last_modified: SystemTime::now(),
        }
    }

    fn file(data: Vec<u8>, metadata: Metadata) -> Self {
        Self {
            is_directory: false,
            data,
            metadata,
            acl: DEFAULT_FILE_ACL.to_string(),
            ..Self::directory()
        }
    }
}

/// Hierarchical namespace kept in a sorted map of full paths.
///
/// Parent directories are created implicitly by directory and file creation,
/// like the real service does.
#[derive(Debug, Default)]
pub struct MemoryDfsClient {
    nodes: Mutex<BTreeMap<String, DfsNode>>,
    log: CallLog,
}

impl MemoryDfsClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a file directly, creating parents, bypassing counters and faults.
    pub fn insert_file(&self, path: &str, data: &[u8]) {
        let mut nodes = self.nodes.lock();
        Self::create_parents(&mut nodes, path);
        nodes.insert(path.to_string(), DfsNode::file(data.to_vec(), Metadata::new()));
    }

    pub fn node(&self, path: &str) -> Option<DfsNode> {
        self.nodes.lock().get(path).cloned()
    }

    /// Overwrites the raw ACL string of a path, valid or not.
    pub fn set_raw_acl(&self, path: &str, acl: &str) {
        if let Some(node) = self.nodes.lock().get_mut(path) {
            node.acl = acl.to_string();
        }
    }

    pub fn paths(&self) -> Vec<String> {
        self.nodes.lock().keys().cloned().collect()
    }

    pub fn calls(&self, op: &str) -> usize {
        self.log.calls(op)
    }

    pub fn reset_calls(&self) {
        self.log.reset();
    }

    pub fn set_faults(&self, plan: FaultPlan) {
        self.log.set_faults(plan);
    }

    fn create_parents(nodes: &mut BTreeMap<String, DfsNode>, path: &str) {
        let mut parent = parent_path(path);
        while !parent.is_empty() {
            nodes
                .entry(parent.to_string())
                .or_insert_with(DfsNode::directory);
            parent = parent_path(parent);
        }
    }

    fn has_children(nodes: &BTreeMap<String, DfsNode>, path: &str) -> bool {
        let prefix = directory_prefix(path);
        nodes.keys().any(|k| k.starts_with(&prefix))
    }

    fn not_found(path: &str) -> RemoteError {
        RemoteError::not_found(format!("path '{path}' not found")).with_code("PathNotFound")
    }

    fn conflict(path: &str, code: &str) -> RemoteError {
        RemoteError::new(CONFLICT_STATUS, format!("conflict on '{path}'")).with_code(code)
    }

    fn local_io(e: &std::io::Error) -> RemoteError {
        RemoteError::new(UNKNOWN_REMOTE_STATUS, e.to_string())
    }
}

impl DfsClient for MemoryDfsClient {
    fn create_directory(&self, path: &str) -> Result<(), RemoteError> {
        self.log.enter("create_directory")?;
        let mut nodes = self.nodes.lock();
        match nodes.get(path) {
            Some(node) if !node.is_directory => Err(Self::conflict(path, "PathConflict")),
            Some(_) => Ok(()),
            None => {
                Self::create_parents(&mut nodes, path);
                nodes.insert(path.to_string(), DfsNode::directory());
                Ok(())
            }
        }
    }

    fn delete_directory(&self, path: &str) -> Result<(), RemoteError> {
        self.log.enter("delete_directory")?;
        let mut nodes = self.nodes.lock();
        match nodes.get(path) {
            None => Err(Self::not_found(path)),
            Some(node) if !node.is_directory => Err(Self::conflict(path, "PathConflict")),
            Some(_) if Self::has_children(&nodes, path) => {
                Err(Self::conflict(path, "DirectoryNotEmpty"))
            }
            Some(_) => {
                nodes.remove(path);
                Ok(())
            }
        }
    }

    fn get_path_properties(&self, path: &str) -> Result<DfsProperties, RemoteError> {
        self.log.enter("get_path_properties")?;
        let nodes = self.nodes.lock();
        let root = DfsNode::directory();
        let node = if path.is_empty() {
            &root
        } else {
            nodes.get(path).ok_or_else(|| Self::not_found(path))?
        };
        Ok(DfsProperties {
            resource_type: if node.is_directory {
                ResourceType::Directory
            } else {
                ResourceType::File
            },
            size: node.data.len() as u64,
            last_modified: node.last_modified,
            etag: String::new(),
            content_md5: Vec::new(),
            metadata: node.metadata.clone(),
            permissions: Some(node.acl.clone()),
            owner: Some(node.owner.clone()),
            group: Some(node.group.clone()),
        })
    }

    fn list_paths(
        &self,
        directory: &str,
        recursive: bool,
        continuation: Option<&str>,
        max_results: usize,
    ) -> Result<PathListing, RemoteError> {
        self.log.enter("list_paths")?;
        let nodes = self.nodes.lock();
        if !directory.is_empty() && !nodes.get(directory).is_some_and(|n| n.is_directory) {
            return Err(Self::not_found(directory));
        }

        let prefix = directory_prefix(directory);
        let mut listing = PathListing::default();
        for (name, node) in nodes.iter() {
            if !name.starts_with(&prefix) {
                continue;
            }
            if !recursive && name[prefix.len()..].contains('/') {
                continue;
            }
            if continuation.is_some_and(|c| name.as_str() <= c) {
                continue;
            }
            if listing.paths.len() == max_results {
                listing.continuation = listing.paths.last().map(|p| p.name.clone());
                break;
            }
            listing.paths.push(DfsPathItem {
                name: name.clone(),
                is_directory: node.is_directory,
                size: node.data.len() as u64,
                last_modified: Some(node.last_modified),
                etag: String::new(),
                permissions: Some(node.acl.clone()),
                owner: Some(node.owner.clone()),
                group: Some(node.group.clone()),
            });
        }
        Ok(listing)
    }

    fn move_path(&self, source: &str, destination: &str) -> Result<(), RemoteError> {
        self.log.enter("move_path")?;
        let mut nodes = self.nodes.lock();
        if !nodes.contains_key(source) {
            return Err(Self::not_found(source));
        }
        if nodes.contains_key(destination) {
            return Err(Self::conflict(destination, "PathAlreadyExists"));
        }
        let dst_parent = parent_path(destination);
        if !dst_parent.is_empty() && !nodes.contains_key(dst_parent) {
            return Err(Self::not_found(dst_parent));
        }

        let moved: Vec<String> = nodes
            .keys()
            .filter(|k| rebase_path(k, source, destination).is_some())
            .cloned()
            .collect();
        for old in moved {
            if let (Some(node), Some(new)) =
                (nodes.remove(&old), rebase_path(&old, source, destination))
            {
                nodes.insert(new, node);
            }
        }
        Ok(())
    }

    fn set_access_control(&self, path: &str, acl: &str) -> Result<(), RemoteError> {
        self.log.enter("set_access_control")?;
        let mut nodes = self.nodes.lock();
        let node = nodes.get_mut(path).ok_or_else(|| Self::not_found(path))?;
        node.acl = acl.to_string();
        Ok(())
    }

    fn set_path_metadata(&self, path: &str, metadata: &Metadata) -> Result<(), RemoteError> {
        self.log.enter("set_path_metadata")?;
        let mut nodes = self.nodes.lock();
        let node = nodes.get_mut(path).ok_or_else(|| Self::not_found(path))?;
        node.metadata = metadata.clone();
        Ok(())
    }

    fn upload_from_file(
        &self,
        path: &str,
        local: &Path,
        metadata: &Metadata,
    ) -> Result<(), RemoteError> {
        self.log.enter("upload_from_file")?;
        let data = fs::read(local).map_err(|e| Self::local_io(&e))?;
        let mut nodes = self.nodes.lock();
        if nodes.get(path).is_some_and(|n| n.is_directory) {
            return Err(Self::conflict(path, "PathConflict"));
        }
        Self::create_parents(&mut nodes, path);
        nodes.insert(path.to_string(), DfsNode::file(data, metadata.clone()));
        Ok(())
    }

    fn download_to_file(&self, path: &str, local: &Path) -> Result<u64, RemoteError> {
        self.log.enter("download_to_file")?;
        let data = self
            .nodes
            .lock()
            .get(path)
            .filter(|n| !n.is_directory)
            .map(|n| n.data.clone())
            .ok_or_else(|| Self::not_found(path))?;
        fs::write(local, &data).map_err(|e| Self::local_io(&e))?;
        Ok(data.len() as u64)
    }

    fn delete_file(&self, path: &str) -> Result<(), RemoteError> {
        self.log.enter("delete_file")?;
        let mut nodes = self.nodes.lock();
        match nodes.get(path) {
            None => Err(Self::not_found(path)),
            Some(node) if node.is_directory => Err(Self::conflict(path, "PathConflict")),
            Some(_) => {
                nodes.remove(path);
                Ok(())
            }
        }
    }

    fn copy_file(&self, source: &str, destination: &str) -> Result<(), RemoteError> {
        self.log.enter("copy_file")?;
        let mut nodes = self.nodes.lock();
        let node = nodes
            .get(source)
            .filter(|n| !n.is_directory)
            .cloned()
            .ok_or_else(|| Self::not_found(source))?;
        Self::create_parents(&mut nodes, destination);
        nodes.insert(destination.to_string(), node);
        Ok(())
    }
}
