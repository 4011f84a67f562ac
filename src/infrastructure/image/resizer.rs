//! Resizer backed by `image::imageops`.

use image::DynamicImage;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::domain::entities::PixelSize;
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::ImageResizer;

/// Largest width or height, in pixels, a derived variant may have.
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

/// Sampling filter used when deriving variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ResizeFilter {
    /// Nearest neighbour.
    Nearest,
    /// Linear.
    Triangle,
    /// Cubic.
    CatmullRom,
    /// Gaussian.
    Gaussian,
    /// Lanczos with window 3.
    #[default]
    Lanczos3,
}

impl ResizeFilter {
    /// Converts to the `image` crate filter.
    #[must_use]
    pub const fn to_filter_type(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Gaussian => FilterType::Gaussian,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Scales to cover the target, then crops the overflow, so the aspect ratio is kept
/// and the output is exactly the requested size.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterResizer {
    filter: ResizeFilter,
}

impl FilterResizer {
    /// Creates a resizer using `filter`.
    #[must_use]
    pub const fn new(filter: ResizeFilter) -> Self {
        Self { filter }
    }
}

impl ImageResizer for FilterResizer {
    fn resize(&self, source: &DynamicImage, target: PixelSize) -> CacheResult<DynamicImage> {
        if source.width() == 0 || source.height() == 0 {
            return Err(CacheError::generation("source bitmap is empty"));
        }
        if target.width == 0 || target.height == 0 {
            return Err(CacheError::generation(format!(
                "cannot resize to {target}"
            )));
        }

        trace!(
            from_width = source.width(),
            from_height = source.height(),
            to = %target,
            "Resizing image"
        );
        Ok(source.resize_to_fill(target.width, target.height, self.filter.to_filter_type()))
    }
}
