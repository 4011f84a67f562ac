//! Cache configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use super::args::CliArgs;
use crate::infrastructure::image::{
    DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DIMENSION, ResizeFilter, StorageFormat,
};
use crate::infrastructure::store::DEFAULT_MAP_SIZE_MB;

const APP_NAME: &str = "vignette";
const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "vignette";
const CONFIG_FILE_NAME: &str = "config.toml";
const STORE_DIR_NAME: &str = "store";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML for this schema.
    #[error("toml deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Settings of an image cache and the binary around it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Store directory. Defaults to the platform cache directory.
    pub path: Option<PathBuf>,

    /// LMDB map size in megabytes.
    pub map_size_mb: usize,

    /// Payload encoding.
    pub format: StorageFormat,

    /// JPEG quality, 1 to 100.
    pub jpeg_quality: u8,

    /// Resampling filter for derived variants.
    pub filter: ResizeFilter,

    /// Derive missing exact-size variants on plain lookups.
    pub generate_on_miss: bool,

    /// Largest width or height, in pixels, of a requested size.
    pub max_dimension: u32,

    /// Log verbosity level.
    pub log_level: LogLevel,

    /// Log file path.
    pub log_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            map_size_mb: DEFAULT_MAP_SIZE_MB,
            format: StorageFormat::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            filter: ResizeFilter::default(),
            generate_on_miss: false,
            max_dimension: DEFAULT_MAX_DIMENSION,
            log_level: LogLevel::Info,
            log_path: None,
        }
    }
}

impl CacheConfig {
    /// Reads the configuration file at `path`, or the default location.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, parsed or validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_config_path) else {
            return Ok(Self::default());
        };
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parses and validates TOML content.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the content is not valid.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for the first out-of-range value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid {
                field: "jpeg_quality",
                reason: format!("{} is not within 1..=100", self.jpeg_quality),
            });
        }
        if self.map_size_mb == 0 {
            return Err(ConfigError::Invalid {
                field: "map_size_mb",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_dimension == 0 {
            return Err(ConfigError::Invalid {
                field: "max_dimension",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Merges CLI arguments into the configuration.
    pub fn apply_args(&mut self, args: &CliArgs) {
        if let Some(store) = &args.store {
            self.path = Some(store.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(format) = args.format {
            self.format = format;
        }
        if let Some(filter) = args.filter {
            self.filter = filter;
        }
        if args.generate_on_miss {
            self.generate_on_miss = true;
        }
    }

    /// Effective store directory.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(Self::default_store_path)
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Returns default store directory.
    #[must_use]
    pub fn default_store_path() -> PathBuf {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME).map_or_else(
            || std::env::temp_dir().join(APP_NAME).join(STORE_DIR_NAME),
            |dirs| dirs.cache_dir().join(STORE_DIR_NAME),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn test_parse_partial_config() {
        let toml_content = r#"
            path = "/var/cache/thumbs"
            format = "jpeg"
            jpeg_quality = 70
            filter = "catmull-rom"
            generate_on_miss = true
        "#;

        let config = CacheConfig::parse(toml_content).expect("Failed to parse config");

        assert_eq!(config.store_path(), PathBuf::from("/var/cache/thumbs"));
        assert_eq!(config.format, StorageFormat::Jpeg);
        assert_eq!(config.jpeg_quality, 70);
        assert_eq!(config.filter, ResizeFilter::CatmullRom);
        assert!(config.generate_on_miss);
        assert_eq!(config.map_size_mb, DEFAULT_MAP_SIZE_MB);
        assert_eq!(config.max_dimension, DEFAULT_MAX_DIMENSION);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();

        assert!(config.path.is_none());
        assert_eq!(config.format, StorageFormat::Png);
        assert!(!config.generate_on_miss);
        assert!(config.store_path().ends_with(STORE_DIR_NAME));
    }

    #[test]
    fn test_rejects_out_of_range_quality() {
        let err = CacheConfig::parse("jpeg_quality = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "jpeg_quality",
                ..
            }
        ));
    }

    #[test]
    fn test_max_dimension() {
        let config = CacheConfig::parse("max_dimension = 2048").unwrap();
        assert_eq!(config.max_dimension, 2048);

        let err = CacheConfig::parse("max_dimension = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "max_dimension",
                ..
            }
        ));
    }

    #[test]
    fn test_missing_file_is_default() {
        let temp = TempDir::new().unwrap();
        let config = CacheConfig::load(Some(temp.path().join("absent.toml").as_path())).unwrap();
        assert_eq!(config, CacheConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("config.toml");
        std::fs::write(&file, "map_size_mb = 64\nlog_level = \"debug\"\n").unwrap();

        let config = CacheConfig::load(Some(file.as_path())).unwrap();
        assert_eq!(config.map_size_mb, 64);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut config = CacheConfig::parse("format = \"png\"").unwrap();
        let args = CliArgs::parse_from([
            "vignette",
            "--store",
            "/tmp/elsewhere",
            "--format",
            "jpeg",
            "--log-level",
            "trace",
            "stats",
        ]);

        config.apply_args(&args);

        assert_eq!(config.store_path(), PathBuf::from("/tmp/elsewhere"));
        assert_eq!(config.format, StorageFormat::Jpeg);
        assert_eq!(config.log_level, LogLevel::Trace);
        assert!(!config.generate_on_miss);
    }
}
