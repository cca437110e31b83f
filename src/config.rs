//! Case configuration
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! max_depth = 64
//! source_cache_capacity = 32
//!
//! [carve]
//! window_size = 10485760
//! overlap = 100
//!
//! [reassembly]
//! shards = 16
//! overlap_policy = "strict"
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default carving window (10 MiB)
pub const DEFAULT_WINDOW_SIZE: usize = 10 * 1024 * 1024;

/// How overlapping TCP segments with conflicting bytes are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Later segments in table order overwrite earlier ones
    #[default]
    Lenient,
    /// Conflicting overlapping bytes are an error
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarveConfig {
    /// Bytes read per scan window
    pub window_size: usize,
    /// Trailing bytes of each window carried into the next one
    pub overlap: usize,
}

impl Default for CarveConfig {
    fn default() -> Self {
        CarveConfig {
            window_size: DEFAULT_WINDOW_SIZE,
            overlap: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReassemblyConfig {
    /// Number of independently locked connection index shards
    pub shards: usize,
    pub overlap_policy: OverlapPolicy,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        ReassemblyConfig {
            shards: 16,
            overlap_policy: OverlapPolicy::Lenient,
        }
    }
}

/// Configuration for a [`Case`](crate::Case)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Maximum number of segments in an address
    pub max_depth: usize,
    /// Number of memory-mapped root sources kept open
    pub source_cache_capacity: usize,
    /// Block size used when the case does not record one
    pub default_block_size: u64,
    /// Upper bound on the output of a decoding layer
    pub max_decoded_size: u64,
    /// Base directory for relative mounted-file paths
    pub mount_root: Option<PathBuf>,
    pub carve: CarveConfig,
    pub reassembly: ReassemblyConfig,
}

impl Default for VfsConfig {
    fn default() -> Self {
        VfsConfig {
            max_depth: 64,
            source_cache_capacity: 32,
            default_block_size: 1024,
            max_decoded_size: 512 * 1024 * 1024,
            mount_root: None,
            carve: CarveConfig::default(),
            reassembly: ReassemblyConfig::default(),
        }
    }
}

impl VfsConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: VfsConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid("max_depth must be at least 1".into()));
        }
        if self.source_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "source_cache_capacity must be at least 1".into(),
            ));
        }
        if self.default_block_size == 0 {
            return Err(ConfigError::Invalid(
                "default_block_size must be non-zero".into(),
            ));
        }
        if self.carve.window_size == 0 {
            return Err(ConfigError::Invalid("carve.window_size must be non-zero".into()));
        }
        if self.carve.overlap >= self.carve.window_size {
            return Err(ConfigError::Invalid(format!(
                "carve.overlap ({}) must be smaller than carve.window_size ({})",
                self.carve.overlap, self.carve.window_size
            )));
        }
        if self.reassembly.shards == 0 {
            return Err(ConfigError::Invalid("reassembly.shards must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = VfsConfig::from_toml_str("").unwrap();
        assert_eq!(config, VfsConfig::default());
        assert_eq!(config.max_depth, 64);
        assert_eq!(config.carve.window_size, DEFAULT_WINDOW_SIZE);
    }

    #[test]
    fn test_partial_document() {
        let config = VfsConfig::from_toml_str(
            r#"
            max_depth = 8

            [reassembly]
            overlap_policy = "strict"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_depth, 8);
        assert_eq!(config.reassembly.overlap_policy, OverlapPolicy::Strict);
        assert_eq!(config.reassembly.shards, 16);
    }

    #[test]
    fn test_rejects_overlap_larger_than_window() {
        let err = VfsConfig::from_toml_str(
            r#"
            [carve]
            window_size = 100
            overlap = 100
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_zero_depth() {
        assert!(VfsConfig::from_toml_str("max_depth = 0").is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = VfsConfig::default();
        config.mount_root = Some(PathBuf::from("/mnt/evidence"));
        let text = config.to_toml_string().unwrap();
        assert_eq!(VfsConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("case.toml");
        std::fs::write(&path, "source_cache_capacity = 4\n").unwrap();
        let config = VfsConfig::load(&path).unwrap();
        assert_eq!(config.source_cache_capacity, 4);
    }
}
