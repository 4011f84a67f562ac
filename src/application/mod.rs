//! Application layer resolving requests against the store.

/// Cache services.
pub mod services;

pub use services::{ImageCache, VariantKey};
