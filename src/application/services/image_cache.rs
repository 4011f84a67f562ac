//! Request resolution, on-demand variant generation and eviction.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::in_flight::InFlightRegistry;
use crate::domain::entities::{
    ImageId, ImageRequest, PixelSize, SizeOption, StoredImage, VariantOptions,
};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{IdentifierDeriver, ImageResizer};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::config::CacheConfig;
use crate::infrastructure::image::{
    ContentHashIdentifier, DEFAULT_MAX_DIMENSION, FilterResizer, ResizeFilter, StandardCodec,
};
use crate::infrastructure::store::{ImageStore, StoreSettings};

/// Key of a variant generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantKey {
    /// Logical image.
    pub identifier: ImageId,
    /// Options the variant is stored under.
    pub options: VariantOptions,
}

/// An exact-size identifier request, resolved to the row that satisfies it.
struct SizedTarget {
    identifier: ImageId,
    /// Options named by the request.
    requested: VariantOptions,
    /// Options the derived image lives under.
    variant: VariantOptions,
    pixels: PixelSize,
}

impl SizedTarget {
    fn key(&self) -> VariantKey {
        VariantKey {
            identifier: self.identifier.clone(),
            options: self.variant.clone(),
        }
    }
}

/// Image cache over a persistent store.
///
/// Resolves requests against the store and derives missing sized variants
/// from the original, running at most one derivation per variant at a time.
/// Cloning is cheap; clones share the store and the in-flight registry.
#[derive(Clone)]
pub struct ImageCache {
    store: ImageStore,
    resizer: Arc<dyn ImageResizer>,
    identifiers: Arc<dyn IdentifierDeriver>,
    in_flight: Arc<InFlightRegistry<VariantKey, Option<StoredImage>>>,
    generate_on_miss: bool,
    max_dimension: u32,
}

/// Times a sized request may enter the in-flight registry before giving up.
const MAX_GENERATION_ATTEMPTS: usize = 4;

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("store", &self.store)
            .field("generate_on_miss", &self.generate_on_miss)
            .field("max_dimension", &self.max_dimension)
            .finish_non_exhaustive()
    }
}

impl ImageCache {
    /// Creates a cache over `store` with the Lanczos3 resizer and content-hash identifiers.
    #[must_use]
    pub fn new(store: ImageStore) -> Self {
        Self {
            store,
            resizer: Arc::new(FilterResizer::new(ResizeFilter::default())),
            identifiers: Arc::new(ContentHashIdentifier),
            in_flight: Arc::new(InFlightRegistry::new()),
            generate_on_miss: false,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }

    /// Opens the store described by `config` and builds a cache over it.
    ///
    /// # Errors
    /// Returns `StorageFault` if the store cannot be opened.
    pub fn open(config: &CacheConfig) -> CacheResult<Self> {
        let codec = StandardCodec::new(config.format, config.jpeg_quality);
        let store = ImageStore::open_with(
            config.store_path(),
            StoreSettings {
                map_size_mb: config.map_size_mb,
            },
            Arc::new(codec),
            Arc::new(SystemClock),
        )?;

        debug!(
            format = %codec.format(),
            filter = ?config.filter,
            generate_on_miss = config.generate_on_miss,
            max_dimension = config.max_dimension,
            "Configured image cache"
        );

        Ok(Self::new(store)
            .with_resizer(Arc::new(FilterResizer::new(config.filter)))
            .with_generate_on_miss(config.generate_on_miss)
            .with_max_dimension(config.max_dimension))
    }

    /// Replaces the resizer.
    #[must_use]
    pub fn with_resizer(mut self, resizer: Arc<dyn ImageResizer>) -> Self {
        self.resizer = resizer;
        self
    }

    /// Replaces the identifier deriver.
    #[must_use]
    pub fn with_identifier_deriver(mut self, identifiers: Arc<dyn IdentifierDeriver>) -> Self {
        self.identifiers = identifiers;
        self
    }

    /// Lets [`Self::execute_request`] derive missing exact-size variants.
    #[must_use]
    pub fn with_generate_on_miss(mut self, enabled: bool) -> Self {
        self.generate_on_miss = enabled;
        self
    }

    /// Caps the width and height of requested sizes; larger requests are
    /// rejected before any lookup or resize.
    #[must_use]
    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension.max(1);
        self
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &ImageStore {
        &self.store
    }

    /// Directory of the backing store.
    #[must_use]
    pub fn location(&self) -> &std::path::Path {
        self.store.location()
    }

    /// Number of variants being generated right now.
    #[must_use]
    pub fn generations_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Resolves an identifier request to one image.
    ///
    /// With `AnySize`, an exact `(identifier, options)` row wins; otherwise any
    /// row of the identifier is accepted (the original first), whatever its
    /// dimensions. Only the returned row has its access date refreshed. With `ExactSize`, only a row of exactly the target pixel
    /// size is returned. A miss is `None` unless generate-on-miss is enabled,
    /// in which case the variant is derived as in
    /// [`Self::execute_request_in_dynamic_cache`].
    ///
    /// # Errors
    /// Returns `InvalidRequest` for access-date requests, undrawable sizes or
    /// sizes above the maximum dimension, `StorageFault` if the store fails,
    /// and generation errors when deriving.
    pub fn execute_request(&self, request: &ImageRequest) -> CacheResult<Option<StoredImage>> {
        let Some(identifier) = Self::single_image_identifier(request)? else {
            return Ok(None);
        };

        let Some(target) = self.sized_target(request)? else {
            let requested = request.options().unwrap_or_default();
            let found = self.store.resolve_any(identifier, &requested)?;
            trace!(id = %identifier, options = %requested, hit = found.is_some(), "Resolved request");
            return Ok(found);
        };

        if let Some(hit) = self.exact_hit(&target)? {
            return Ok(Some(hit));
        }
        if self.generate_on_miss {
            return self.generate(&target);
        }

        trace!(id = %identifier, options = %target.requested, size = %target.pixels, "Exact-size miss");
        Ok(None)
    }

    /// Resolves an identifier request, deriving the sized variant from the
    /// original when no row of the exact size exists.
    ///
    /// With `AnySize` this is [`Self::execute_request`]. Returns `None` when
    /// the identifier has no original to derive from. Concurrent calls for the
    /// same variant share a single derivation and its outcome.
    ///
    /// # Errors
    /// Returns `GenerationFailure` if the resizer fails or produces the wrong
    /// size, `InvalidRequest` for access-date requests, undrawable sizes or
    /// sizes above the maximum dimension, and `StorageFault` if the store fails.
    pub fn execute_request_in_dynamic_cache(
        &self,
        request: &ImageRequest,
    ) -> CacheResult<Option<StoredImage>> {
        if Self::single_image_identifier(request)?.is_none() {
            return Ok(None);
        }
        let Some(target) = self.sized_target(request)? else {
            return self.execute_request(request);
        };

        if let Some(hit) = self.exact_hit(&target)? {
            return Ok(Some(hit));
        }
        self.generate(&target)
    }

    /// Stores an original under an identifier derived from its encoded bytes.
    ///
    /// # Errors
    /// Returns `IdentifierRequired` if no identifier can be derived, `CodecError`
    /// if the image cannot be encoded and `StorageFault` if the write fails.
    pub fn store_image(&self, image: impl Into<Arc<DynamicImage>>) -> CacheResult<StoredImage> {
        let image = image.into();
        let payload = self.store.codec().encode(&image)?;
        let identifier = self
            .identifiers
            .derive(&payload)
            .ok_or(CacheError::IdentifierRequired)?;

        self.store
            .store_encoded(image, &payload, &identifier, &VariantOptions::original(), true)
    }

    /// Stores an original under `identifier`.
    ///
    /// # Errors
    /// Returns `CodecError` if the image cannot be encoded and `StorageFault`
    /// if the write fails.
    pub fn store_image_for_identifier(
        &self,
        image: impl Into<Arc<DynamicImage>>,
        identifier: &ImageId,
    ) -> CacheResult<StoredImage> {
        self.store_image_as(image, identifier, true)
    }

    /// Stores an image under `identifier` with empty options.
    ///
    /// # Errors
    /// Returns `CodecError` if the image cannot be encoded and `StorageFault`
    /// if the write fails.
    pub fn store_image_as(
        &self,
        image: impl Into<Arc<DynamicImage>>,
        identifier: &ImageId,
        is_original: bool,
    ) -> CacheResult<StoredImage> {
        self.store
            .store(image, identifier, &VariantOptions::original(), is_original)
    }

    /// Stores an image at the identifier and options a request names.
    /// It is an original iff the options are empty.
    ///
    /// # Errors
    /// Returns `IdentifierRequired` for requests without an identifier,
    /// `CodecError` if the image cannot be encoded and `StorageFault` if the
    /// write fails.
    pub fn store_image_for_request(
        &self,
        image: impl Into<Arc<DynamicImage>>,
        request: &ImageRequest,
    ) -> CacheResult<StoredImage> {
        let (Some(identifier), Some(options)) = (request.identifier_ref(), request.options())
        else {
            return Err(CacheError::IdentifierRequired);
        };

        let is_original = options.is_original();
        self.store.store(image, identifier, &options, is_original)
    }

    /// Removes the rows matching `request`.
    ///
    /// # Errors
    /// Returns `StorageFault` if the deletion cannot be committed.
    pub fn delete(&self, request: &ImageRequest) -> CacheResult<usize> {
        self.store.delete(request)
    }

    /// Removes every row last accessed before `date`.
    ///
    /// # Errors
    /// Returns `StorageFault` if the sweep cannot be committed.
    pub fn clean_cache_using_access_date(&self, date: DateTime<Utc>) -> CacheResult<usize> {
        let removed = self.store.delete(&ImageRequest::older_than(date))?;
        info!(before = %date, removed, "Cleaned image cache");
        Ok(removed)
    }

    /// Runs [`Self::execute_request`] on the blocking pool.
    ///
    /// # Errors
    /// Same as [`Self::execute_request`], plus `Worker` if the task fails.
    pub async fn execute_request_async(
        &self,
        request: ImageRequest,
    ) -> CacheResult<Option<StoredImage>> {
        self.off_thread(move |cache| cache.execute_request(&request))
            .await
    }

    /// Runs [`Self::execute_request_in_dynamic_cache`] on the blocking pool.
    ///
    /// # Errors
    /// Same as [`Self::execute_request_in_dynamic_cache`], plus `Worker` if the
    /// task fails.
    pub async fn execute_request_in_dynamic_cache_async(
        &self,
        request: ImageRequest,
    ) -> CacheResult<Option<StoredImage>> {
        self.off_thread(move |cache| cache.execute_request_in_dynamic_cache(&request))
            .await
    }

    /// Runs [`Self::store_image`] on the blocking pool.
    ///
    /// # Errors
    /// Same as [`Self::store_image`], plus `Worker` if the task fails.
    pub async fn store_image_async(
        &self,
        image: impl Into<Arc<DynamicImage>>,
    ) -> CacheResult<StoredImage> {
        let image = image.into();
        self.off_thread(move |cache| cache.store_image(image)).await
    }

    /// Runs [`Self::store_image_for_identifier`] on the blocking pool.
    ///
    /// # Errors
    /// Same as [`Self::store_image_for_identifier`], plus `Worker` if the task fails.
    pub async fn store_image_for_identifier_async(
        &self,
        image: impl Into<Arc<DynamicImage>>,
        identifier: ImageId,
    ) -> CacheResult<StoredImage> {
        let image = image.into();
        self.off_thread(move |cache| cache.store_image_for_identifier(image, &identifier))
            .await
    }

    /// Runs [`Self::store_image_for_request`] on the blocking pool.
    ///
    /// # Errors
    /// Same as [`Self::store_image_for_request`], plus `Worker` if the task fails.
    pub async fn store_image_for_request_async(
        &self,
        image: impl Into<Arc<DynamicImage>>,
        request: ImageRequest,
    ) -> CacheResult<StoredImage> {
        let image = image.into();
        self.off_thread(move |cache| cache.store_image_for_request(image, &request))
            .await
    }

    /// Runs [`Self::clean_cache_using_access_date`] on the blocking pool.
    ///
    /// # Errors
    /// Same as [`Self::clean_cache_using_access_date`], plus `Worker` if the
    /// task fails.
    pub async fn clean_cache_using_access_date_async(
        &self,
        date: DateTime<Utc>,
    ) -> CacheResult<usize> {
        self.off_thread(move |cache| cache.clean_cache_using_access_date(date))
            .await
    }

    /// Resolves `request` on the blocking pool and hands the outcome to
    /// `completion` exactly once, on a pool thread.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn execute_request_with<F>(&self, request: ImageRequest, completion: F) -> JoinHandle<()>
    where
        F: FnOnce(CacheResult<Option<StoredImage>>) + Send + 'static,
    {
        self.deliver(move |cache| cache.execute_request(&request), completion)
    }

    /// Sweeps rows last accessed before `date` on the blocking pool and hands
    /// the number removed to `completion` exactly once, on a pool thread.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn clean_cache_using_access_date_with<F>(
        &self,
        date: DateTime<Utc>,
        completion: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(CacheResult<usize>) + Send + 'static,
    {
        self.deliver(
            move |cache| cache.clean_cache_using_access_date(date),
            completion,
        )
    }

    /// Identifier of a request that names a single image.
    fn single_image_identifier(request: &ImageRequest) -> CacheResult<Option<&ImageId>> {
        match request {
            ImageRequest::Undefined => Ok(None),
            ImageRequest::OlderThanAccessDate(_) | ImageRequest::NewerThanAccessDate(_) => {
                Err(CacheError::invalid_request(format!(
                    "{} requests select many images",
                    request.kind()
                )))
            }
            ImageRequest::ByIdentifier { identifier, .. }
            | ImageRequest::ByIdentifierAndOptions { identifier, .. } => Ok(Some(identifier)),
        }
    }

    /// Resolves an `ExactSize` request; `None` for `AnySize`.
    ///
    /// Sized variants of the original live under their canonical size options,
    /// so they never replace the original row.
    fn sized_target(&self, request: &ImageRequest) -> CacheResult<Option<SizedTarget>> {
        let SizeOption::ExactSize { size, scale } = request.size_option() else {
            return Ok(None);
        };
        let (Some(identifier), Some(requested)) = (request.identifier_ref(), request.options())
        else {
            return Ok(None);
        };

        let pixels = size.to_pixels(scale)?;
        if pixels.width > self.max_dimension || pixels.height > self.max_dimension {
            return Err(CacheError::invalid_request(format!(
                "{pixels} exceeds the maximum dimension of {}",
                self.max_dimension
            )));
        }
        let variant = if requested.is_original() {
            VariantOptions::for_size(size, scale)
        } else {
            requested.clone()
        };

        Ok(Some(SizedTarget {
            identifier: identifier.clone(),
            requested,
            variant,
            pixels,
        }))
    }

    /// A stored row that already has the target size.
    fn exact_hit(&self, target: &SizedTarget) -> CacheResult<Option<StoredImage>> {
        if target.requested.is_original() {
            let original = self
                .store
                .get(&target.identifier, &target.requested)?
                .filter(|image| image.dimensions() == target.pixels);
            if original.is_some() {
                return Ok(original);
            }
        }

        let hit = self
            .store
            .get(&target.identifier, &target.variant)?
            .filter(|image| image.dimensions() == target.pixels);
        if hit.is_some() {
            trace!(id = %target.identifier, options = %target.variant, "Exact-size hit");
        }
        Ok(hit)
    }

    /// Derives the variant, or joins the generation already running for its key.
    ///
    /// Requests of different sizes can share a variant key. A joined outcome of
    /// the wrong size is discarded and the flight is entered again, so the
    /// caller ends up owning a generation that re-checks the store.
    fn generate(&self, target: &SizedTarget) -> CacheResult<Option<StoredImage>> {
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let outcome = self
                .in_flight
                .run(target.key(), || self.derive(target))
                .inspect_err(|e| {
                    warn!(
                        id = %target.identifier,
                        options = %target.variant,
                        error = %e,
                        "Variant generation failed"
                    );
                })?;

            match outcome {
                Some(image) if image.dimensions() != target.pixels => {
                    debug!(
                        id = %target.identifier,
                        options = %target.variant,
                        joined = %image.dimensions(),
                        wanted = %target.pixels,
                        "Joined generation of another size, retrying"
                    );
                }
                other => return Ok(other),
            }
        }

        Err(CacheError::generation(format!(
            "variant {} of {} kept changing size under concurrent generations",
            target.variant, target.identifier
        )))
    }

    /// Body of a generation; runs with the variant key claimed.
    fn derive(&self, target: &SizedTarget) -> CacheResult<Option<StoredImage>> {
        // A generation may have finished between the caller's check and the claim.
        if let Some(hit) = self
            .store
            .get(&target.identifier, &target.variant)?
            .filter(|image| image.dimensions() == target.pixels)
        {
            return Ok(Some(hit));
        }

        let Some(original) = self.store.original(&target.identifier)? else {
            trace!(id = %target.identifier, "No original to derive from");
            return Ok(None);
        };
        if original.options == target.variant {
            return Err(CacheError::generation(format!(
                "variant {} of {} would replace the original",
                target.variant, target.identifier
            )));
        }

        let derived = self.resizer.resize(&original.image, target.pixels)?;
        let produced = PixelSize::new(derived.width(), derived.height());
        if produced != target.pixels {
            return Err(CacheError::generation(format!(
                "resizer produced {produced}, expected {}",
                target.pixels
            )));
        }

        let stored = self
            .store
            .store(derived, &target.identifier, &target.variant, false)?;
        debug!(
            id = %target.identifier,
            options = %target.variant,
            size = %target.pixels,
            "Generated variant"
        );
        Ok(Some(stored.generated()))
    }

    async fn off_thread<T, F>(&self, work: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> CacheResult<T> + Send + 'static,
    {
        let cache = self.clone();
        match tokio::task::spawn_blocking(move || work(&cache)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Cache worker failed");
                Err(e.into())
            }
        }
    }

    fn deliver<T, W, F>(&self, work: W, completion: F) -> JoinHandle<()>
    where
        T: Send + 'static,
        W: FnOnce(&Self) -> CacheResult<T> + Send + 'static,
        F: FnOnce(CacheResult<T>) + Send + 'static,
    {
        let cache = self.clone();
        tokio::task::spawn_blocking(move || {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| work(&cache)))
                .unwrap_or_else(|_| {
                    error!("Cache worker panicked");
                    Err(CacheError::Worker("worker panicked".to_string()))
                });
            completion(outcome);
        })
    }
}
