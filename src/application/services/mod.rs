pub mod image_cache;
mod in_flight;

pub use image_cache::{ImageCache, VariantKey};
pub(crate) use in_flight::InFlightRegistry;
