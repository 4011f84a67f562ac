//! Resize port definition.

use image::DynamicImage;

use crate::domain::entities::PixelSize;
use crate::domain::errors::CacheResult;

/// Produces a derived bitmap of a target pixel size.
pub trait ImageResizer: Send + Sync {
    /// Resizes `source` to exactly `target`.
    ///
    /// # Errors
    /// Returns `GenerationFailure` if the variant cannot be produced.
    fn resize(&self, source: &DynamicImage, target: PixelSize) -> CacheResult<DynamicImage>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::domain::errors::CacheError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Resizer that counts calls and can be slowed down.
    #[derive(Default)]
    pub struct CountingResizer {
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl CountingResizer {
        /// Creates a resizer that sleeps for `delay` on every call.
        pub fn slow(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Some(delay),
            }
        }

        /// Number of resize calls so far.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ImageResizer for CountingResizer {
        fn resize(&self, source: &DynamicImage, target: PixelSize) -> CacheResult<DynamicImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            Ok(source.resize_exact(
                target.width,
                target.height,
                image::imageops::FilterType::Nearest,
            ))
        }
    }

    /// Resizer that always fails, optionally after a delay.
    #[derive(Default)]
    pub struct FailingResizer {
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl FailingResizer {
        /// Creates a resizer that sleeps for `delay` before failing.
        pub fn slow(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Some(delay),
            }
        }

        /// Number of resize calls so far.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ImageResizer for FailingResizer {
        fn resize(&self, _source: &DynamicImage, _target: PixelSize) -> CacheResult<DynamicImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            Err(CacheError::generation("malformed source bitmap"))
        }
    }

    /// Resizer that panics on every call.
    #[derive(Default)]
    pub struct PanickingResizer {
        calls: AtomicUsize,
    }

    impl PanickingResizer {
        /// Number of resize calls so far.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ImageResizer for PanickingResizer {
        fn resize(&self, _source: &DynamicImage, _target: PixelSize) -> CacheResult<DynamicImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("resize kernel crashed");
        }
    }
}
