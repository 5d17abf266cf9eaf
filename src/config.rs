//! Cache configuration module
//!
//! Host-side settings for opening a cache. These never change wire-format
//! decisions (sector size, flag bits, and compression tags are all fixed by
//! the on-disk format); they only toggle conveniences like strict digest
//! verification and the compression used when synthesising fresh archives.

use std::env;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::container::Compression;
use crate::error::{CacheError, Result};

/// Settings for opening and operating a `Cache`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Path to the directory containing `main_file_cache.dat2` and friends.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// When set, `Cache::write_member` verifies an existing entry's CRC32
    /// (and Whirlpool, if the table flags it) against the reference-table
    /// entry before trusting the decoded archive.
    #[serde(default = "default_true")]
    pub strict_digests: bool,

    /// Compression used when `Cache::write_member` must synthesise a brand
    /// new archive container (no existing entry to preserve the compression
    /// of).
    #[serde(default = "default_archive_compression")]
    pub default_archive_compression: Compression,
}

fn default_directory() -> PathBuf {
    PathBuf::from("./data/cache")
}

fn default_true() -> bool {
    true
}

fn default_archive_compression() -> Compression {
    Compression::Gzip
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            strict_digests: default_true(),
            default_archive_compression: default_archive_compression(),
        }
    }
}

impl CacheConfig {
    /// Build a config pointing at `directory`, otherwise defaulted.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file, falling back to defaults with a
    /// warning if the file does not exist. The `JAGEX_CACHE_DIR` environment
    /// variable, if set, overrides whatever directory the file specifies.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content)
                .map_err(|e| CacheError::Corrupt(format!("invalid config at {}: {e}", path.display())))?
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        if let Ok(dir) = env::var("JAGEX_CACHE_DIR") {
            config.directory = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(CacheError::Corrupt("cache directory must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = CacheConfig::default();
        assert_eq!(config.directory, PathBuf::from("./data/cache"));
        assert!(config.strict_digests);
        assert_eq!(config.default_archive_compression, Compression::Gzip);
    }

    #[test]
    fn new_overrides_directory_only() {
        let config = CacheConfig::new("/tmp/mycache");
        assert_eq!(config.directory, PathBuf::from("/tmp/mycache"));
        assert!(config.strict_digests);
    }

    #[test]
    fn toml_round_trip() {
        let config = CacheConfig::new("/var/cache/jagex");
        let text = toml::to_string(&config).unwrap();
        let parsed: CacheConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.directory, config.directory);
        assert_eq!(parsed.strict_digests, config.strict_digests);
        assert_eq!(
            parsed.default_archive_compression,
            config.default_archive_compression
        );
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let config = CacheConfig::load("/nonexistent/path/cache.toml").unwrap();
        assert_eq!(config.directory, CacheConfig::default().directory);
    }
}
