//! Image request values.
//!
//! A request describes what a caller wants from (or wants removed from) the
//! cache. Each kind carries only the fields that mean something for it.

use chrono::{DateTime, Utc};

use super::image::{ImageId, VariantOptions};
use crate::domain::errors::{CacheError, CacheResult};

/// Logical width and height, before the density scale is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    /// Logical width.
    pub width: u32,
    /// Logical height.
    pub height: u32,
}

impl Size {
    /// Creates a new size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Pixel dimensions of this size at the given density.
    ///
    /// # Errors
    /// Returns `InvalidRequest` if the scale is not a positive finite number or
    /// either resulting dimension is zero or out of range.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_pixels(self, scale: f32) -> CacheResult<PixelSize> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(CacheError::invalid_request(format!(
                "scale must be positive, got {scale}"
            )));
        }

        let scale = f64::from(scale);
        let width = (f64::from(self.width) * scale).round();
        let height = (f64::from(self.height) * scale).round();
        let max = f64::from(u32::MAX);

        if width < 1.0 || height < 1.0 || width > max || height > max {
            return Err(CacheError::invalid_request(format!(
                "{}x{} at {scale}x is not a drawable size",
                self.width, self.height
            )));
        }

        Ok(PixelSize::new(width as u32, height as u32))
    }
}

/// Physical dimensions of a bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PixelSize {
    /// Creates a new pixel size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for PixelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Size constraint of an identifier request.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SizeOption {
    /// Any stored variant of the identifier satisfies the request.
    #[default]
    AnySize,
    /// The result must be exactly `size` at `scale` density.
    ExactSize {
        /// Logical target size.
        size: Size,
        /// Density multiplier.
        scale: f32,
    },
}

impl SizeOption {
    /// Returns true for `ExactSize`.
    #[must_use]
    pub const fn is_exact(&self) -> bool {
        matches!(self, Self::ExactSize { .. })
    }
}

/// Discriminant of an [`ImageRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Matches nothing.
    Undefined,
    /// The original of an identifier.
    ByIdentifier,
    /// A specific variant of an identifier.
    ByIdentifierAndOptions,
    /// Every entry last accessed before a date.
    OlderThanAccessDate,
    /// Every entry last accessed after a date.
    NewerThanAccessDate,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::ByIdentifier => write!(f, "identifier"),
            Self::ByIdentifierAndOptions => write!(f, "identifier+options"),
            Self::OlderThanAccessDate => write!(f, "older-than"),
            Self::NewerThanAccessDate => write!(f, "newer-than"),
        }
    }
}

/// What a caller wants from the cache.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ImageRequest {
    /// Matches nothing.
    #[default]
    Undefined,
    /// The original of `identifier`.
    ByIdentifier {
        /// Logical image.
        identifier: ImageId,
        /// Size constraint.
        size: SizeOption,
    },
    /// The `options` variant of `identifier`.
    ByIdentifierAndOptions {
        /// Logical image.
        identifier: ImageId,
        /// Variant key.
        options: VariantOptions,
        /// Size constraint.
        size: SizeOption,
    },
    /// Every entry whose last access is strictly before the date.
    OlderThanAccessDate(DateTime<Utc>),
    /// Every entry whose last access is strictly after the date.
    NewerThanAccessDate(DateTime<Utc>),
}

impl ImageRequest {
    /// Requests the original of an identifier.
    #[must_use]
    pub fn identifier(identifier: impl Into<ImageId>) -> Self {
        Self::ByIdentifier {
            identifier: identifier.into(),
            size: SizeOption::AnySize,
        }
    }

    /// Requests a variant of an identifier.
    #[must_use]
    pub fn variant(identifier: impl Into<ImageId>, options: impl Into<VariantOptions>) -> Self {
        Self::ByIdentifierAndOptions {
            identifier: identifier.into(),
            options: options.into(),
            size: SizeOption::AnySize,
        }
    }

    /// Requests every entry last accessed before `date`.
    #[must_use]
    pub const fn older_than(date: DateTime<Utc>) -> Self {
        Self::OlderThanAccessDate(date)
    }

    /// Requests every entry last accessed after `date`.
    #[must_use]
    pub const fn newer_than(date: DateTime<Utc>) -> Self {
        Self::NewerThanAccessDate(date)
    }

    /// Demands an exact size. Has no effect on non-identifier requests.
    #[must_use]
    pub fn with_exact_size(self, size: Size, scale: f32) -> Self {
        self.with_size_option(SizeOption::ExactSize { size, scale })
    }

    /// Accepts any size. Has no effect on non-identifier requests.
    #[must_use]
    pub fn with_any_size(self) -> Self {
        self.with_size_option(SizeOption::AnySize)
    }

    fn with_size_option(self, option: SizeOption) -> Self {
        match self {
            Self::ByIdentifier { identifier, .. } => Self::ByIdentifier {
                identifier,
                size: option,
            },
            Self::ByIdentifierAndOptions {
                identifier,
                options,
                ..
            } => Self::ByIdentifierAndOptions {
                identifier,
                options,
                size: option,
            },
            other => other,
        }
    }

    /// The kind of this request.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::Undefined => RequestKind::Undefined,
            Self::ByIdentifier { .. } => RequestKind::ByIdentifier,
            Self::ByIdentifierAndOptions { .. } => RequestKind::ByIdentifierAndOptions,
            Self::OlderThanAccessDate(_) => RequestKind::OlderThanAccessDate,
            Self::NewerThanAccessDate(_) => RequestKind::NewerThanAccessDate,
        }
    }

    /// Identifier of an identifier request.
    #[must_use]
    pub const fn identifier_ref(&self) -> Option<&ImageId> {
        match self {
            Self::ByIdentifier { identifier, .. }
            | Self::ByIdentifierAndOptions { identifier, .. } => Some(identifier),
            _ => None,
        }
    }

    /// Variant options addressed by the request; the original's for `ByIdentifier`.
    #[must_use]
    pub fn options(&self) -> Option<VariantOptions> {
        match self {
            Self::ByIdentifier { .. } => Some(VariantOptions::original()),
            Self::ByIdentifierAndOptions { options, .. } => Some(options.clone()),
            _ => None,
        }
    }

    /// Size constraint; `AnySize` for access-date requests.
    #[must_use]
    pub const fn size_option(&self) -> SizeOption {
        match self {
            Self::ByIdentifier { size, .. } | Self::ByIdentifierAndOptions { size, .. } => *size,
            _ => SizeOption::AnySize,
        }
    }

    /// Threshold of an access-date request.
    #[must_use]
    pub const fn access_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::OlderThanAccessDate(date) | Self::NewerThanAccessDate(date) => Some(*date),
            _ => None,
        }
    }
}
