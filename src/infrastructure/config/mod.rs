//! Cache configuration.

/// Settings file and defaults.
pub mod app_config;
/// Command-line flags.
pub mod args;

pub use app_config::{CacheConfig, ConfigError, LogLevel};
pub use args::{CliArgs, Command, SizeArgs};
