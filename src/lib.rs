//! Vignette - a persistent image cache.
//!
//! This crate stores original images under stable identifiers in an LMDB
//! environment, derives sized variants from them on demand with at most one
//! derivation per variant in flight, and evicts entries by access date.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer resolving requests and generating variants.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for storage, images and configuration.
pub mod infrastructure;

pub use application::ImageCache;
pub use domain::{CacheError, CacheResult, ImageId, ImageRequest, StoredImage, VariantOptions};

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = "vignette";
