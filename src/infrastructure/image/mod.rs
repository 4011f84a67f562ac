//! Image collaborators.
//!
//! This module provides:
//! - Encoding and decoding of stored payloads
//! - Resizing of originals into derived variants
//! - Content-hash identifiers for images stored without one

pub mod codec;
pub mod identifier;
pub mod resizer;

pub use codec::{DEFAULT_JPEG_QUALITY, StandardCodec, StorageFormat};
pub use identifier::ContentHashIdentifier;
pub use resizer::{DEFAULT_MAX_DIMENSION, FilterResizer, ResizeFilter};
