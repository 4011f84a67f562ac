//! Domain layer with request values, errors, and collaborator ports.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{ImageId, ImageRequest, StoredImage, VariantOptions};
pub use errors::{CacheError, CacheResult};
