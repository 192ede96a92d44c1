//! Attribute types shared by both backend variants.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::acl::acl_string_to_mode_or_zero;

/// Metadata key marking a zero-length blob as a directory.
pub const FOLDER_MARKER_KEY: &str = "hdi_isfolder";

/// Metadata key holding the last access time (unix seconds).
pub const LAST_ACCESS_KEY: &str = "last_access";

/// Metadata key holding the last status change time (unix seconds).
pub const LAST_CHANGE_KEY: &str = "last_change";

/// Ordered list of user metadata pairs.
///
/// Order is preserved because the remote store returns and accepts metadata
/// as a list; keys are compared case-insensitively like the store does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata(Vec<(String, String)>);

impl Metadata {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Metadata of a flat-namespace directory marker.
    pub fn folder_marker() -> Self {
        Self(vec![(FOLDER_MARKER_KEY.to_string(), "true".to_string())])
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Sets `key` to `value`, replacing an existing entry in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.0.iter().position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        Some(self.0.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether these are the metadata of a directory marker blob.
    pub fn is_folder_marker(&self) -> bool {
        self.get(FOLDER_MARKER_KEY)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Reads a unix-seconds timestamp stored under `key`.
    pub fn timestamp(&self, key: &str) -> Option<SystemTime> {
        let secs: u64 = self.get(key)?.trim().parse().ok()?;
        UNIX_EPOCH.checked_add(Duration::from_secs(secs))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Formats `time` the way timestamps are stored in metadata.
pub fn unix_seconds(time: SystemTime) -> String {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
        .to_string()
}

/// Kind of a remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    File,
    Directory,
}

/// Answer of an existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathKind {
    NotFound,
    File,
    Directory,
}

impl PathKind {
    pub fn exists(self) -> bool {
        self != Self::NotFound
    }
}

/// Emptiness of a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectoryState {
    Missing,
    Empty,
    NotEmpty,
}

/// Attributes of a remote path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathProperties {
    pub size: u64,
    pub last_modified: SystemTime,
    pub content_md5: Vec<u8>,
    pub etag: String,
    pub metadata: Metadata,
    pub resource_type: ResourceType,
    /// 9-character ACL string; only the hierarchical namespace has one.
    pub permissions: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

impl PathProperties {
    /// Properties of a directory with no backing object of its own.
    pub fn virtual_directory() -> Self {
        Self {
            size: 0,
            last_modified: SystemTime::now(),
            content_md5: Vec::new(),
            etag: String::new(),
            metadata: Metadata::new(),
            resource_type: ResourceType::Directory,
            permissions: None,
            owner: None,
            group: None,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.resource_type == ResourceType::Directory
    }

    /// Permission bits parsed from the ACL string.
    ///
    /// `None` when the backend has no permission model; a malformed string
    /// yields `Some(0)` and a warning.
    pub fn mode(&self, path: &str) -> Option<u32> {
        self.permissions
            .as_deref()
            .map(|acl| acl_string_to_mode_or_zero(path, acl))
    }

    /// Last access time from metadata, falling back to `last_modified`.
    pub fn last_access(&self) -> SystemTime {
        self.metadata
            .timestamp(LAST_ACCESS_KEY)
            .unwrap_or(self.last_modified)
    }

    /// Last status change time from metadata, falling back to `last_modified`.
    pub fn last_change(&self) -> SystemTime {
        self.metadata
            .timestamp(LAST_CHANGE_KEY)
            .unwrap_or(self.last_modified)
    }
}

/// One entry of a listing page. `name` is the full logical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub last_modified: Option<SystemTime>,
    pub metadata: Metadata,
    pub mode: Option<u32>,
}

impl ListEntry {
    /// Final path component.
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// One page of a listing and the cursor for the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub entries: Vec<ListEntry>,
    pub continuation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_set_replaces_in_place() {
        let mut md: Metadata = [("a", "1"), ("b", "2")].into_iter().collect();
        md.set("A", "3");
        md.set("c", "4");
        let pairs: Vec<_> = md.iter().collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "2"), ("c", "4")]);
        assert_eq!(md.remove("b").as_deref(), Some("2"));
        assert_eq!(md.len(), 2);
    }

    #[test]
    fn test_folder_marker_detection() {
        assert!(Metadata::folder_marker().is_folder_marker());
        let md: Metadata = [("HDI_ISFOLDER", "TRUE")].into_iter().collect();
        assert!(md.is_folder_marker());
        let md: Metadata = [(FOLDER_MARKER_KEY, "false")].into_iter().collect();
        assert!(!md.is_folder_marker());
        assert!(!Metadata::new().is_folder_marker());
    }

    #[test]
    fn test_timestamps_fall_back_to_last_modified() {
        let mut props = PathProperties::virtual_directory();
        props.last_modified = UNIX_EPOCH + Duration::from_secs(100);
        assert_eq!(props.last_change(), props.last_modified);

        props.metadata.set(LAST_CHANGE_KEY, "200");
        props.metadata.set(LAST_ACCESS_KEY, "garbage");
        assert_eq!(props.last_change(), UNIX_EPOCH + Duration::from_secs(200));
        assert_eq!(props.last_access(), props.last_modified);
        assert_eq!(unix_seconds(UNIX_EPOCH + Duration::from_secs(200)), "200");
    }

    #[test]
    fn test_mode_from_permissions() {
        let mut props = PathProperties::virtual_directory();
        assert_eq!(props.mode("d"), None);
        props.permissions = Some("rwxr-x---".to_string());
        assert_eq!(props.mode("d"), Some(0o750));
        props.permissions = Some("bad".to_string());
        assert_eq!(props.mode("d"), Some(0));
    }
}
