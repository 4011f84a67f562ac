//! Domain entity definitions.

mod image;
mod request;

pub use image::{ImageId, ImageSource, StoredImage, VariantOptions};
pub use request::{ImageRequest, PixelSize, RequestKind, Size, SizeOption};
