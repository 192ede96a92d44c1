//! Usage of the filesystem holding the cache directory.

use std::path::Path;

use nix::sys::statvfs::statvfs;

use crate::error::{CacheError, CacheResult};

/// Capacity figures of a filesystem, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub total_bytes: u64,
    /// Bytes available to unprivileged users.
    pub available_bytes: u64,
}

impl DiskUsage {
    /// Fraction of the filesystem in use, in `[0, 1]`.
    pub fn used_fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        used as f64 / self.total_bytes as f64
    }
}

/// Queries the filesystem that contains `path`.
pub fn filesystem_usage(path: &Path) -> CacheResult<DiskUsage> {
    let stat = statvfs(path).map_err(|source| CacheError::DiskUsage {
        path: path.to_path_buf(),
        source,
    })?;
    let fragment = u64::from(stat.fragment_size());
    Ok(DiskUsage {
        total_bytes: u64::from(stat.blocks()) * fragment,
        available_bytes: u64::from(stat.blocks_available()) * fragment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_fraction() {
        let usage = DiskUsage {
            total_bytes: 1000,
            available_bytes: 250,
        };
        assert!((usage.used_fraction() - 0.75).abs() < f64::EPSILON);

        let empty = DiskUsage {
            total_bytes: 0,
            available_bytes: 0,
        };
        assert_eq!(empty.used_fraction(), 0.0);
    }

    #[test]
    fn test_filesystem_usage_of_temp_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let usage = filesystem_usage(dir.path()).unwrap();
        assert!(usage.total_bytes > 0);
        assert!(usage.available_bytes <= usage.total_bytes);
    }

    #[test]
    fn test_missing_path_fails() {
        let err = filesystem_usage(Path::new("/definitely/not/here")).unwrap_err();
        assert_eq!(err.to_errno(), libc::ENOENT);
    }
}
