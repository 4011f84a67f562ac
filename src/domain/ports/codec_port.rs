//! Image codec port definition.

use image::DynamicImage;

use crate::domain::errors::CacheResult;

/// Converts bitmaps to and from the bytes kept in the store.
pub trait ImageCodec: Send + Sync {
    /// Encodes a bitmap for persistence.
    ///
    /// # Errors
    /// Returns `CodecError` if the bitmap cannot be encoded.
    fn encode(&self, image: &DynamicImage) -> CacheResult<Vec<u8>>;

    /// Decodes persisted bytes back into a bitmap.
    ///
    /// # Errors
    /// Returns `CodecError` if the bytes are not a readable image.
    fn decode(&self, bytes: &[u8]) -> CacheResult<DynamicImage>;
}
