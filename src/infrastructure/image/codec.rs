//! Payload codec backed by the `image` crate.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::domain::errors::CacheResult;
use crate::domain::ports::ImageCodec;

/// Default JPEG quality.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Encoding used for persisted payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    /// Lossless, keeps alpha.
    #[default]
    Png,
    /// Lossy, drops alpha.
    Jpeg,
}

impl std::fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::Jpeg => write!(f, "jpeg"),
        }
    }
}

/// Codec writing PNG or JPEG payloads and reading any format the crate was built with.
#[derive(Debug, Clone, Copy)]
pub struct StandardCodec {
    format: StorageFormat,
    jpeg_quality: u8,
}

impl StandardCodec {
    /// Creates a codec for the given format.
    #[must_use]
    pub const fn new(format: StorageFormat, jpeg_quality: u8) -> Self {
        Self {
            format,
            jpeg_quality,
        }
    }

    /// Lossless PNG codec.
    #[must_use]
    pub const fn png() -> Self {
        Self::new(StorageFormat::Png, DEFAULT_JPEG_QUALITY)
    }

    /// Format used when encoding.
    #[must_use]
    pub const fn format(&self) -> StorageFormat {
        self.format
    }
}

impl Default for StandardCodec {
    fn default() -> Self {
        Self::png()
    }
}

impl ImageCodec for StandardCodec {
    fn encode(&self, image: &DynamicImage) -> CacheResult<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        match self.format {
            StorageFormat::Png => image.write_to(&mut buffer, ImageFormat::Png)?,
            StorageFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut buffer, self.jpeg_quality);
                image.to_rgb8().write_with_encoder(encoder)?;
            }
        }
        let bytes = buffer.into_inner();
        trace!(format = %self.format, size = bytes.len(), "Encoded image payload");
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> CacheResult<DynamicImage> {
        Ok(image::load_from_memory(bytes)?)
    }
}
