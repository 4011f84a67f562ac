//! Infrastructure layer with adapters for storage, images and configuration.

/// Wall clock.
pub mod clock;
/// Cache configuration.
pub mod config;
/// Image codec, resizer and identifier adapters.
pub mod image;
/// Persistent LMDB store.
pub mod store;

pub use clock::SystemClock;
pub use config::{CacheConfig, CliArgs, ConfigError, LogLevel};
pub use image::{ContentHashIdentifier, FilterResizer, ResizeFilter, StandardCodec, StorageFormat};
pub use store::{ImageStore, StoreSettings};
