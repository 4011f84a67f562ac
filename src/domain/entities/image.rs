//! Domain types for cached images.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::request::{PixelSize, Size};

/// Stable identifier naming a logical image.
/// Callers pick it, or it is derived from the image content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub String);

impl ImageId {
    /// Creates a new `ImageId` from any string-like input.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates an `ImageId` by hashing raw image bytes.
    ///
    /// The same bytes always produce the same identifier.
    #[must_use]
    pub fn from_content(bytes: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let result = hasher.finalize();
        Self(hex::encode(&result[..16]))
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ImageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ImageId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Opaque string telling a derived variant apart from the original.
/// Empty means the original.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantOptions(pub String);

impl VariantOptions {
    /// Creates options from any string-like input.
    #[must_use]
    pub fn new(options: impl Into<String>) -> Self {
        Self(options.into())
    }

    /// The options of an original image.
    #[must_use]
    pub const fn original() -> Self {
        Self(String::new())
    }

    /// Canonical options key for a size-only variant, e.g. `"100x80@2x"`.
    #[must_use]
    pub fn for_size(size: Size, scale: f32) -> Self {
        Self(format!("{}x{}@{}x", size.width, size.height, scale))
    }

    /// Returns true if these options address the original image.
    #[must_use]
    pub fn is_original(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VariantOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_original() {
            write!(f, "<original>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<&str> for VariantOptions {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for VariantOptions {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Where a returned image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Read back from the persistent store.
    Store,
    /// Derived from the original during this request (or the generation it joined).
    Generated,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store => write!(f, "store"),
            Self::Generated => write!(f, "generated"),
        }
    }
}

/// An image resolved from the cache together with its row metadata.
#[derive(Debug, Clone)]
pub struct StoredImage {
    /// Identifier of the logical image.
    pub identifier: ImageId,
    /// Variant options; empty for the original.
    pub options: VariantOptions,
    /// Whether this row is the original for its identifier.
    pub is_original: bool,
    /// The decoded bitmap.
    pub image: Arc<image::DynamicImage>,
    /// Last read or write of the row, after this access.
    pub last_access: DateTime<Utc>,
    /// Where the image came from.
    pub source: ImageSource,
}

impl StoredImage {
    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Pixel dimensions of the bitmap.
    #[must_use]
    pub fn dimensions(&self) -> PixelSize {
        PixelSize::new(self.image.width(), self.image.height())
    }

    /// Marks the image as freshly generated.
    #[must_use]
    pub fn generated(mut self) -> Self {
        self.source = ImageSource::Generated;
        self
    }
}
