//! Drive configuration, loaded from RON.
//!
//! ```ron
//! (
//!     case_sensitive: false,
//!     separator: Backslash,
//!     sector_size: 4096,
//!     cache: Some((block_size: 65536)),
//! )
//! ```
//!
//! Every field is optional; missing ones take their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Separator used when the drive renders paths (cache keys, listings).
/// Input paths may use either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Separator {
    #[default]
    Slash,
    Backslash,
}

impl Separator {
    pub fn as_char(self) -> char {
        match self {
            Separator::Slash => '/',
            Separator::Backslash => '\\',
        }
    }
}

/// Settings for the reference block cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub block_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { block_size: 4096 }
    }
}

/// Drive-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Sibling names compare case-sensitively. Defaults to the host convention.
    pub case_sensitive: bool,
    pub separator: Separator,
    /// statFs granularity; a non-zero power of two.
    pub sector_size: u32,
    pub total_space: u64,
    pub default_file_mode: u32,
    pub default_dir_mode: u32,
    pub cache: Option<CacheConfig>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            case_sensitive: !cfg!(windows),
            separator: Separator::default(),
            sector_size: 512,
            total_space: 1 << 30,
            default_file_mode: 0o644,
            default_dir_mode: 0o755,
            cache: None,
        }
    }
}

impl DriveConfig {
    /// Parse and validate RON text.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: DriveConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.sector_size.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "sector_size must be a non-zero power of two, got {}",
                self.sector_size
            )));
        }
        if let Some(cache) = &self.cache {
            if cache.block_size == 0 {
                return Err(ConfigError::Invalid("cache.block_size must be non-zero".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ron_is_default() {
        let config = DriveConfig::from_ron("()").unwrap();
        assert_eq!(config, DriveConfig::default());
        assert_eq!(config.sector_size, 512);
        assert_eq!(config.cache, None);
    }

    #[test]
    fn test_partial_ron() {
        let config = DriveConfig::from_ron(
            "(case_sensitive: false, separator: Backslash, cache: Some((block_size: 64)))",
        )
        .unwrap();
        assert!(!config.case_sensitive);
        assert_eq!(config.separator.as_char(), '\\');
        assert_eq!(config.cache, Some(CacheConfig { block_size: 64 }));
        assert_eq!(config.total_space, 1 << 30);
    }

    #[test]
    fn test_rejects_bad_sector_size() {
        for bad in ["(sector_size: 0)", "(sector_size: 1000)"] {
            assert!(matches!(
                DriveConfig::from_ron(bad),
                Err(ConfigError::Invalid(_))
            ));
        }
    }

    #[test]
    fn test_rejects_zero_block_size() {
        assert!(matches!(
            DriveConfig::from_ron("(cache: Some((block_size: 0)))"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(
            DriveConfig::from_ron("(sector_size: )"),
            Err(ConfigError::Ron(_))
        ));
    }
}
