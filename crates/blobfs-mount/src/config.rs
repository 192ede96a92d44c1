//! Mount configuration.
//!
//! Loaded from a JSON file; durations use humantime strings (`"120s"`,
//! `"2m"`). Every field except `cache_root` has a default.
//!
//! ```
//! use blobfs_mount::config::{BackendSelection, MountConfig};
//! use std::time::Duration;
//!
//! let config = MountConfig::from_json(r#"{
//!     "cache_root": "/var/cache/blobfs",
//!     "file_cache_timeout": "5m",
//!     "backend": "hierarchical"
//! }"#).unwrap();
//!
//! assert_eq!(config.file_cache_timeout, Duration::from_secs(300));
//! assert_eq!(config.backend, BackendSelection::Hierarchical);
//! assert_eq!(config.high_threshold, 0.90);
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use blobfs_core::backend::{BackendKind, DEFAULT_LIST_PAGE_SIZE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading or validating a [`MountConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Which backend variant to mount with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSelection {
    #[default]
    Flat,
    Hierarchical,
}

impl BackendSelection {
    pub fn kind(self) -> BackendKind {
        match self {
            Self::Flat => BackendKind::Flat,
            Self::Hierarchical => BackendKind::Hierarchical,
        }
    }
}

fn default_file_cache_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_reclaim_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_high_threshold() -> f64 {
    0.90
}

fn default_low_threshold() -> f64 {
    0.80
}

fn default_permission() -> u32 {
    0o770
}

fn default_max_concurrency() -> usize {
    32
}

fn default_list_page_size() -> usize {
    DEFAULT_LIST_PAGE_SIZE
}

/// Settings consumed by the cache manager and the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Cache directory; cached copies live under `<cache_root>/root`.
    pub cache_root: PathBuf,

    /// Age after which a closed file is evicted.
    #[serde(with = "humantime_serde", default = "default_file_cache_timeout")]
    pub file_cache_timeout: Duration,

    /// Period of the background reclaimer.
    #[serde(with = "humantime_serde", default = "default_reclaim_interval")]
    pub reclaim_interval: Duration,

    /// Absolute cache budget. When unset the usage of the filesystem holding
    /// the cache is used instead.
    #[serde(default)]
    pub cache_size_bytes: Option<u64>,

    /// Usage fraction that switches disk-pressure eviction on.
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,

    /// Usage fraction under which disk-pressure eviction switches off again.
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,

    /// Mode bits of directories created in the cache tree.
    #[serde(default = "default_permission")]
    pub default_permission: u32,

    #[serde(default)]
    pub backend: BackendSelection,

    /// Upper bound on concurrent remote operations, forwarded to the client.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// When set, attribute lookups are cached for this long.
    #[serde(with = "humantime_serde", default)]
    pub attr_cache_timeout: Option<Duration>,

    /// Page size of greedy listings.
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
}

impl MountConfig {
    /// Configuration with defaults for everything but the cache root.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            file_cache_timeout: default_file_cache_timeout(),
            reclaim_interval: default_reclaim_interval(),
            cache_size_bytes: None,
            high_threshold: default_high_threshold(),
            low_threshold: default_low_threshold(),
            default_permission: default_permission(),
            backend: BackendSelection::default(),
            max_concurrency: default_max_concurrency(),
            attr_cache_timeout: None,
            list_page_size: default_list_page_size(),
        }
    }

    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "cache_root",
                reason: "must not be empty".to_string(),
            });
        }
        for (field, value) in [
            ("high_threshold", self.high_threshold),
            ("low_threshold", self.low_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is outside (0, 1]"),
                });
            }
        }
        if self.low_threshold > self.high_threshold {
            return Err(ConfigError::Invalid {
                field: "low_threshold",
                reason: format!(
                    "{} is above high_threshold {}",
                    self.low_threshold, self.high_threshold
                ),
            });
        }
        if self.cache_size_bytes == Some(0) {
            return Err(ConfigError::Invalid {
                field: "cache_size_bytes",
                reason: "must be positive when set".to_string(),
            });
        }
        if self.list_page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "list_page_size",
                reason: "must be positive".to_string(),
            });
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrency",
                reason: "must be positive".to_string(),
            });
        }
        if self.default_permission & !0o7777 != 0 {
            return Err(ConfigError::Invalid {
                field: "default_permission",
                reason: format!("{:o} has bits outside 0o7777", self.default_permission),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MountConfig::from_json(r#"{"cache_root": "/tmp/c"}"#).unwrap();
        assert_eq!(config, MountConfig::new("/tmp/c"));
        assert_eq!(config.file_cache_timeout, Duration::from_secs(120));
        assert_eq!(config.reclaim_interval, Duration::from_secs(1));
        assert_eq!(config.default_permission, 0o770);
        assert_eq!(config.backend, BackendSelection::Flat);
        assert_eq!(config.max_concurrency, 32);
        assert_eq!(config.list_page_size, 5000);
        assert!(config.attr_cache_timeout.is_none());
    }

    #[test]
    fn test_humantime_fields() {
        let config = MountConfig::from_json(
            r#"{"cache_root": "/c", "reclaim_interval": "250ms", "attr_cache_timeout": "30s"}"#,
        )
        .unwrap();
        assert_eq!(config.reclaim_interval, Duration::from_millis(250));
        assert_eq!(config.attr_cache_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_validation() {
        let mut config = MountConfig::new("/c");
        config.low_threshold = 0.95;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "low_threshold", .. })
        ));

        let mut config = MountConfig::new("/c");
        config.high_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = MountConfig::new("");
        config.high_threshold = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "cache_root", .. })
        ));

        let mut config = MountConfig::new("/c");
        config.list_page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_backend_is_parse_error() {
        let err = MountConfig::from_json(r#"{"cache_root": "/c", "backend": "nfs"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("blobfs.json");
        fs::write(&path, r#"{"cache_root": "/c", "cache_size_bytes": 1048576}"#).unwrap();
        let config = MountConfig::load(&path).unwrap();
        assert_eq!(config.cache_size_bytes, Some(1_048_576));

        let err = MountConfig::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
