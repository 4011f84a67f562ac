//! LMDB-backed image store.
//!
//! Uses the heed crate (Rust bindings for LMDB). Three databases live in one
//! environment:
//! - `entries`: primary key → flags and last access date
//! - `payloads`: primary key → encoded image bytes
//! - `access_index`: access date + primary key → unit, for range queries
//!
//! Every operation runs in a single transaction, so a row is never partially
//! written. Reads are write transactions because they refresh access dates.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use heed::types::{Bytes, Unit};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use image::DynamicImage;
use tracing::{debug, info, trace};

use super::record::{
    EntryFlags, RecordHeader, decode_index_key, decode_key, encode_key, identifier_prefix,
    index_key, truncate_to_millis,
};
use crate::domain::entities::{ImageId, ImageRequest, ImageSource, StoredImage, VariantOptions};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{Clock, ImageCodec};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::image::StandardCodec;

/// Default LMDB map size in megabytes.
pub const DEFAULT_MAP_SIZE_MB: usize = 256;

const ENTRIES_DB: &str = "entries";
const PAYLOADS_DB: &str = "payloads";
const ACCESS_INDEX_DB: &str = "access_index";

/// Tunables of the backing environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// Maximum size of the database in megabytes.
    pub map_size_mb: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            map_size_mb: DEFAULT_MAP_SIZE_MB,
        }
    }
}

/// An entry read inside a transaction, before its payload is decoded.
struct Row {
    key: Vec<u8>,
    header: RecordHeader,
    payload: Vec<u8>,
}

/// Persistent key/blob store addressed by `(identifier, options)`.
///
/// Cloning is cheap; clones share the same environment.
#[derive(Clone)]
pub struct ImageStore {
    location: PathBuf,
    env: Env,
    entries: Database<Bytes, Bytes>,
    payloads: Database<Bytes, Bytes>,
    access_index: Database<Bytes, Unit>,
    codec: Arc<dyn ImageCodec>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ImageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageStore")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl ImageStore {
    /// Opens (or creates) a store at `path` with the PNG codec and system clock.
    ///
    /// # Errors
    /// Returns `StorageFault` if the directory or environment cannot be opened.
    pub fn open(path: impl AsRef<Path>, settings: StoreSettings) -> CacheResult<Self> {
        Self::open_with(
            path,
            settings,
            Arc::new(StandardCodec::default()),
            Arc::new(SystemClock),
        )
    }

    /// Opens (or creates) a store with explicit collaborators.
    ///
    /// # Errors
    /// Returns `StorageFault` if the directory or environment cannot be opened.
    pub fn open_with(
        path: impl AsRef<Path>,
        settings: StoreSettings,
        codec: Arc<dyn ImageCodec>,
        clock: Arc<dyn Clock>,
    ) -> CacheResult<Self> {
        let location = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&location).map_err(|e| {
            CacheError::storage(format!(
                "Failed to create store dir {}: {e}",
                location.display()
            ))
        })?;

        // SAFETY: the environment files are only touched through this handle and its clones.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(settings.map_size_mb.max(1) * 1024 * 1024)
                .max_dbs(3)
                .open(&location)
        }
        .map_err(|e| {
            CacheError::storage(format!(
                "Failed to open store at {}: {e}",
                location.display()
            ))
        })?;

        let mut wtxn = env.write_txn()?;
        let entries: Database<Bytes, Bytes> = env.create_database(&mut wtxn, Some(ENTRIES_DB))?;
        let payloads: Database<Bytes, Bytes> =
            env.create_database(&mut wtxn, Some(PAYLOADS_DB))?;
        let access_index: Database<Bytes, Unit> =
            env.create_database(&mut wtxn, Some(ACCESS_INDEX_DB))?;
        wtxn.commit()?;

        info!(path = %location.display(), map_size_mb = settings.map_size_mb, "Opened image store");

        Ok(Self {
            location,
            env,
            entries,
            payloads,
            access_index,
            codec,
            clock,
        })
    }

    /// Directory holding the environment.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Codec used for payloads.
    #[must_use]
    pub fn codec(&self) -> &Arc<dyn ImageCodec> {
        &self.codec
    }

    /// Returns every entry matching `request`, refreshing their access dates.
    ///
    /// - `ByIdentifier` / `ByIdentifierAndOptions`: the exact key; with `AnySize`
    ///   and no exact entry, every entry of the identifier.
    /// - `OlderThanAccessDate` / `NewerThanAccessDate`: every entry strictly on
    ///   that side of the date.
    ///
    /// An empty vector means no match.
    ///
    /// # Errors
    /// Returns `StorageFault` if the store cannot be read or updated.
    pub fn lookup(&self, request: &ImageRequest) -> CacheResult<Vec<StoredImage>> {
        let now = self.clock.now();
        let mut wtxn = self.env.write_txn()?;
        let keys = self.matching_keys(&wtxn, request)?;

        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(row) = self.touch(&mut wtxn, &key, now)? {
                rows.push(row);
            }
        }
        wtxn.commit()?;

        let images = rows
            .into_iter()
            .map(|row| self.materialize(row))
            .collect::<CacheResult<Vec<_>>>()?;

        trace!(kind = %request.kind(), matches = images.len(), "Store lookup");
        Ok(images)
    }

    /// Returns the entry at exactly `(identifier, options)`, refreshing its access date.
    ///
    /// # Errors
    /// Returns `StorageFault` if the store cannot be read or updated.
    pub fn get(
        &self,
        identifier: &ImageId,
        options: &VariantOptions,
    ) -> CacheResult<Option<StoredImage>> {
        let key = encode_key(identifier, options)?;
        let now = self.clock.now();
        let mut wtxn = self.env.write_txn()?;
        let row = self.touch(&mut wtxn, &key, now)?;
        wtxn.commit()?;

        row.map(|row| self.materialize(row)).transpose()
    }

    /// Returns the entry flagged original for `identifier`, refreshing its access date.
    ///
    /// # Errors
    /// Returns `StorageFault` if the store cannot be read or updated.
    pub fn original(&self, identifier: &ImageId) -> CacheResult<Option<StoredImage>> {
        let now = self.clock.now();
        let mut wtxn = self.env.write_txn()?;

        let mut found = None;
        for (key, header) in self.identifier_rows(&wtxn, identifier)? {
            if header.is_original() {
                found = Some(key);
                break;
            }
        }

        let row = match found {
            Some(key) => self.touch(&mut wtxn, &key, now)?,
            None => None,
        };
        wtxn.commit()?;

        row.map(|row| self.materialize(row)).transpose()
    }

    /// Returns the single entry an `AnySize` lookup resolves to: the exact
    /// `(identifier, options)` row, else the original, else the first row of
    /// the identifier. Only the returned row has its access date refreshed.
    ///
    /// # Errors
    /// Returns `StorageFault` if the store cannot be read or updated.
    pub fn resolve_any(
        &self,
        identifier: &ImageId,
        options: &VariantOptions,
    ) -> CacheResult<Option<StoredImage>> {
        let exact = encode_key(identifier, options)?;
        let now = self.clock.now();
        let mut wtxn = self.env.write_txn()?;

        let chosen = if self.entries.get(&wtxn, &exact)?.is_some() {
            Some(exact)
        } else {
            let mut rows = self.identifier_rows(&wtxn, identifier)?;
            let position = rows
                .iter()
                .position(|(_, header)| header.is_original())
                .unwrap_or(0);
            (position < rows.len()).then(|| rows.swap_remove(position).0)
        };

        let row = match chosen {
            Some(key) => self.touch(&mut wtxn, &key, now)?,
            None => None,
        };
        wtxn.commit()?;

        row.map(|row| self.materialize(row)).transpose()
    }

    /// Upserts the entry at `(identifier, options)`.
    ///
    /// Storing an original demotes any other original of the identifier, so at
    /// most one entry per identifier is flagged original.
    ///
    /// # Errors
    /// Returns `CodecError` if the image cannot be encoded and `StorageFault`
    /// if the write cannot be committed. Nothing is written on failure.
    pub fn store(
        &self,
        image: impl Into<Arc<DynamicImage>>,
        identifier: &ImageId,
        options: &VariantOptions,
        is_original: bool,
    ) -> CacheResult<StoredImage> {
        let image = image.into();
        let payload = self.codec.encode(&image)?;
        self.store_encoded(image, &payload, identifier, options, is_original)
    }

    /// Upserts an entry whose payload is already encoded with this store's codec.
    pub(crate) fn store_encoded(
        &self,
        image: Arc<DynamicImage>,
        payload: &[u8],
        identifier: &ImageId,
        options: &VariantOptions,
        is_original: bool,
    ) -> CacheResult<StoredImage> {
        let key = encode_key(identifier, options)?;
        let now = truncate_to_millis(self.clock.now());
        let mut wtxn = self.env.write_txn()?;

        let previous = match self.entries.get(&wtxn, &key)? {
            Some(raw) => Some(RecordHeader::decode(raw)?),
            None => None,
        };
        let last_access = previous.map_or(now, |prev| prev.last_access.max(now));
        if let Some(prev) = previous {
            self.access_index
                .delete(&mut wtxn, &index_key(prev.last_access, &key))?;
        }

        let flags = if is_original {
            self.demote_originals(&mut wtxn, identifier, &key)?;
            EntryFlags::ORIGINAL
        } else {
            EntryFlags::empty()
        };

        let header = RecordHeader::new(flags, last_access);
        self.entries.put(&mut wtxn, &key, &header.encode())?;
        self.payloads.put(&mut wtxn, &key, payload)?;
        self.access_index
            .put(&mut wtxn, &index_key(header.last_access, &key), &())?;
        wtxn.commit()?;

        debug!(
            id = %identifier,
            options = %options,
            is_original,
            size = payload.len(),
            "Stored image"
        );

        Ok(StoredImage {
            identifier: identifier.clone(),
            options: options.clone(),
            is_original,
            image,
            last_access: header.last_access,
            source: ImageSource::Store,
        })
    }

    /// Removes the entries matching `request` and returns how many were removed.
    ///
    /// `ByIdentifier` removes the original and every variant of the identifier;
    /// `ByIdentifierAndOptions` removes the exact entry; access-date requests
    /// remove every entry on that side of the date. No match is not an error.
    ///
    /// # Errors
    /// Returns `StorageFault` if the deletion cannot be committed.
    pub fn delete(&self, request: &ImageRequest) -> CacheResult<usize> {
        let mut wtxn = self.env.write_txn()?;

        let keys = match request {
            ImageRequest::ByIdentifier { identifier, .. } => self
                .identifier_rows(&wtxn, identifier)?
                .into_iter()
                .map(|(key, _)| key)
                .collect(),
            ImageRequest::ByIdentifierAndOptions {
                identifier,
                options,
                ..
            } => {
                let key = encode_key(identifier, options)?;
                if self.entries.get(&wtxn, &key)?.is_some() {
                    vec![key]
                } else {
                    Vec::new()
                }
            }
            other => self.matching_keys(&wtxn, other)?,
        };

        let mut removed = 0;
        for key in &keys {
            if self.remove_row(&mut wtxn, key)? {
                removed += 1;
            }
        }
        wtxn.commit()?;

        debug!(kind = %request.kind(), removed, "Deleted store entries");
        Ok(removed)
    }

    /// Number of stored entries.
    ///
    /// # Errors
    /// Returns `StorageFault` if the store cannot be read.
    pub fn entry_count(&self) -> CacheResult<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.entries.len(&rtxn)?)
    }

    /// Runs [`Self::lookup`] on the blocking pool.
    ///
    /// # Errors
    /// Same as [`Self::lookup`], plus `Worker` if the task fails.
    pub async fn lookup_async(&self, request: ImageRequest) -> CacheResult<Vec<StoredImage>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.lookup(&request)).await?
    }

    /// Runs [`Self::original`] on the blocking pool.
    ///
    /// # Errors
    /// Same as [`Self::original`], plus `Worker` if the task fails.
    pub async fn original_async(&self, identifier: ImageId) -> CacheResult<Option<StoredImage>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.original(&identifier)).await?
    }

    /// Runs [`Self::store`] on the blocking pool.
    ///
    /// # Errors
    /// Same as [`Self::store`], plus `Worker` if the task fails.
    pub async fn store_async(
        &self,
        image: impl Into<Arc<DynamicImage>>,
        identifier: ImageId,
        options: VariantOptions,
        is_original: bool,
    ) -> CacheResult<StoredImage> {
        let store = self.clone();
        let image = image.into();
        tokio::task::spawn_blocking(move || {
            store.store(image, &identifier, &options, is_original)
        })
        .await?
    }

    /// Runs [`Self::delete`] on the blocking pool.
    ///
    /// # Errors
    /// Same as [`Self::delete`], plus `Worker` if the task fails.
    pub async fn delete_async(&self, request: ImageRequest) -> CacheResult<usize> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.delete(&request)).await?
    }

    /// Runs [`Self::entry_count`] on the blocking pool.
    ///
    /// # Errors
    /// Same as [`Self::entry_count`], plus `Worker` if the task fails.
    pub async fn entry_count_async(&self) -> CacheResult<u64> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.entry_count()).await?
    }

    fn matching_keys(&self, txn: &RoTxn, request: &ImageRequest) -> CacheResult<Vec<Vec<u8>>> {
        match request {
            ImageRequest::Undefined => Ok(Vec::new()),
            ImageRequest::ByIdentifier { identifier, size } => {
                self.exact_or_identifier(txn, identifier, &VariantOptions::original(), !size.is_exact())
            }
            ImageRequest::ByIdentifierAndOptions {
                identifier,
                options,
                size,
            } => self.exact_or_identifier(txn, identifier, options, !size.is_exact()),
            ImageRequest::OlderThanAccessDate(threshold) => self.accessed_before(txn, *threshold),
            ImageRequest::NewerThanAccessDate(threshold) => self.accessed_after(txn, *threshold),
        }
    }

    fn exact_or_identifier(
        &self,
        txn: &RoTxn,
        identifier: &ImageId,
        options: &VariantOptions,
        any_size: bool,
    ) -> CacheResult<Vec<Vec<u8>>> {
        let key = encode_key(identifier, options)?;
        if self.entries.get(txn, &key)?.is_some() {
            return Ok(vec![key]);
        }
        if !any_size {
            return Ok(Vec::new());
        }
        Ok(self
            .identifier_rows(txn, identifier)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    fn identifier_rows(
        &self,
        txn: &RoTxn,
        identifier: &ImageId,
    ) -> CacheResult<Vec<(Vec<u8>, RecordHeader)>> {
        let prefix = identifier_prefix(identifier)?;
        let mut rows = Vec::new();
        for item in self.entries.prefix_iter(txn, &prefix)? {
            let (key, raw) = item?;
            rows.push((key.to_vec(), RecordHeader::decode(raw)?));
        }
        Ok(rows)
    }

    fn accessed_before(&self, txn: &RoTxn, threshold: DateTime<Utc>) -> CacheResult<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        for item in self.access_index.iter(txn)? {
            let (index, ()) = item?;
            let (accessed, primary) = decode_index_key(index)?;
            if accessed >= threshold {
                break;
            }
            keys.push(primary.to_vec());
        }
        Ok(keys)
    }

    fn accessed_after(&self, txn: &RoTxn, threshold: DateTime<Utc>) -> CacheResult<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        for item in self.access_index.rev_iter(txn)? {
            let (index, ()) = item?;
            let (accessed, primary) = decode_index_key(index)?;
            if accessed <= threshold {
                break;
            }
            keys.push(primary.to_vec());
        }
        Ok(keys)
    }

    /// Reads a row and moves its access date forward to `now`.
    fn touch(
        &self,
        wtxn: &mut RwTxn,
        key: &[u8],
        now: DateTime<Utc>,
    ) -> CacheResult<Option<Row>> {
        let Some(raw) = self.entries.get(wtxn, key)? else {
            return Ok(None);
        };
        let header = RecordHeader::decode(raw)?;
        let payload = self
            .payloads
            .get(wtxn, key)?
            .ok_or_else(|| CacheError::storage("entry has no payload"))?
            .to_vec();

        let accessed = truncate_to_millis(now).max(header.last_access);
        let header = if accessed == header.last_access {
            header
        } else {
            let updated = header.with_last_access(accessed);
            self.access_index
                .delete(wtxn, &index_key(header.last_access, key))?;
            self.entries.put(wtxn, key, &updated.encode())?;
            self.access_index
                .put(wtxn, &index_key(updated.last_access, key), &())?;
            updated
        };

        Ok(Some(Row {
            key: key.to_vec(),
            header,
            payload,
        }))
    }

    fn demote_originals(
        &self,
        wtxn: &mut RwTxn,
        identifier: &ImageId,
        keep: &[u8],
    ) -> CacheResult<()> {
        let demoted: Vec<_> = self
            .identifier_rows(wtxn, identifier)?
            .into_iter()
            .filter(|(key, header)| header.is_original() && key.as_slice() != keep)
            .collect();

        for (key, header) in demoted {
            let updated = header.with_flags(header.flags - EntryFlags::ORIGINAL);
            self.entries.put(wtxn, &key, &updated.encode())?;
            debug!(id = %identifier, "Demoted previous original");
        }
        Ok(())
    }

    fn remove_row(&self, wtxn: &mut RwTxn, key: &[u8]) -> CacheResult<bool> {
        let Some(raw) = self.entries.get(wtxn, key)? else {
            return Ok(false);
        };
        let header = RecordHeader::decode(raw)?;

        self.access_index
            .delete(wtxn, &index_key(header.last_access, key))?;
        self.payloads.delete(wtxn, key)?;
        Ok(self.entries.delete(wtxn, key)?)
    }

    fn materialize(&self, row: Row) -> CacheResult<StoredImage> {
        let (identifier, options) = decode_key(&row.key)?;
        let image = self.codec.decode(&row.payload).map_err(|e| {
            CacheError::storage(format!("corrupt payload for {identifier}/{options}: {e}"))
        })?;

        Ok(StoredImage {
            identifier,
            options,
            is_original: row.header.is_original(),
            image: Arc::new(image),
            last_access: row.header.last_access,
            source: ImageSource::Store,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Size;
    use crate::domain::ports::mocks::{ManualClock, epoch_secs};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn create_test_store() -> (ImageStore, Arc<ManualClock>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::at(0));
        let store = ImageStore::open_with(
            temp_dir.path(),
            StoreSettings { map_size_mb: 16 },
            Arc::new(StandardCodec::png()),
            clock.clone(),
        )
        .unwrap();
        (store, clock, temp_dir)
    }

    fn bitmap(width: u32, height: u32) -> DynamicImage {
        DynamicImage::new_rgb8(width, height)
    }

    fn ids(images: &[StoredImage]) -> HashSet<(String, String)> {
        images
            .iter()
            .map(|img| (img.identifier.0.clone(), img.options.0.clone()))
            .collect()
    }

    #[test]
    fn test_store_and_lookup_original() {
        let (store, _clock, _temp) = create_test_store();
        let id = ImageId::new("photo1");

        store
            .store(bitmap(20, 10), &id, &VariantOptions::original(), true)
            .unwrap();
        let found = store.lookup(&ImageRequest::identifier("photo1")).unwrap();

        assert_eq!(found.len(), 1);
        assert!(found[0].is_original);
        assert_eq!((found[0].width(), found[0].height()), (20, 10));
        assert_eq!(found[0].source, ImageSource::Store);
    }

    #[test]
    fn test_lookup_miss_is_empty() {
        let (store, _clock, _temp) = create_test_store();
        assert!(store.lookup(&ImageRequest::identifier("nope")).unwrap().is_empty());
        assert!(store.lookup(&ImageRequest::Undefined).unwrap().is_empty());
    }

    #[test]
    fn test_variant_lookup_exact_and_any_size() {
        let (store, _clock, _temp) = create_test_store();
        let id = ImageId::new("photo1");
        store
            .store(bitmap(20, 20), &id, &VariantOptions::new("small"), false)
            .unwrap();

        let exact = store
            .lookup(&ImageRequest::variant("photo1", "small"))
            .unwrap();
        assert_eq!(exact.len(), 1);
        assert!(!exact[0].is_original);

        let direct = store
            .get(&id, &VariantOptions::new("small"))
            .unwrap()
            .unwrap();
        assert_eq!((direct.width(), direct.height()), (20, 20));
        assert!(store.get(&id, &VariantOptions::original()).unwrap().is_none());

        let exact_size_miss = store
            .lookup(&ImageRequest::variant("photo1", "large").with_exact_size(Size::new(50, 50), 1.0))
            .unwrap();
        assert!(exact_size_miss.is_empty());

        let any_size = store.lookup(&ImageRequest::variant("photo1", "large")).unwrap();
        assert_eq!(any_size.len(), 1);
        assert_eq!(any_size[0].options.as_str(), "small");
    }

    #[test]
    fn test_overwrite_replaces_bytes() {
        let (store, _clock, _temp) = create_test_store();
        let id = ImageId::new("photo1");
        let options = VariantOptions::new("v");

        store.store(bitmap(5, 5), &id, &options, false).unwrap();
        store.store(bitmap(7, 3), &id, &options, false).unwrap();

        let found = store.lookup(&ImageRequest::variant("photo1", "v")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].width(), found[0].height()), (7, 3));
        assert_eq!(store.entry_count().unwrap(), 1);
    }

    #[test]
    fn test_at_most_one_original_per_identifier() {
        let (store, _clock, _temp) = create_test_store();
        let id = ImageId::new("photo1");

        store
            .store(bitmap(5, 5), &id, &VariantOptions::original(), true)
            .unwrap();
        store
            .store(bitmap(6, 6), &id, &VariantOptions::new("raw"), true)
            .unwrap();

        let all = store.lookup(&ImageRequest::variant("photo1", "missing")).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|img| img.is_original).count(), 1);

        let original = store.original(&id).unwrap().unwrap();
        assert_eq!(original.options.as_str(), "raw");
    }

    #[test]
    fn test_read_refreshes_access_date() {
        let (store, clock, _temp) = create_test_store();
        let id = ImageId::new("photo1");

        clock.set(10);
        let written = store
            .store(bitmap(2, 2), &id, &VariantOptions::original(), true)
            .unwrap();
        assert_eq!(written.last_access, epoch_secs(10));

        clock.set(30);
        let read = store.lookup(&ImageRequest::identifier("photo1")).unwrap();
        assert_eq!(read[0].last_access, epoch_secs(30));

        // A clock that goes backwards never moves the date back.
        clock.set(5);
        let reread = store.lookup(&ImageRequest::identifier("photo1")).unwrap();
        assert_eq!(reread[0].last_access, epoch_secs(30));

        let older = store.lookup(&ImageRequest::older_than(epoch_secs(20))).unwrap();
        assert!(older.is_empty());
    }

    #[test]
    fn test_access_date_ranges() {
        let (store, clock, _temp) = create_test_store();

        for (name, at) in [("a", 10), ("b", 20), ("c", 30)] {
            clock.set(at);
            store
                .store(bitmap(1, 1), &ImageId::new(name), &VariantOptions::original(), true)
                .unwrap();
        }
        clock.set(100);

        let older = store.lookup(&ImageRequest::older_than(epoch_secs(20))).unwrap();
        assert_eq!(ids(&older), HashSet::from([("a".to_string(), String::new())]));

        // "a" was refreshed to 100 by the previous lookup; "b" sits exactly on the threshold.
        let newer = store.lookup(&ImageRequest::newer_than(epoch_secs(20))).unwrap();
        let expected: HashSet<_> = ["a", "c"]
            .into_iter()
            .map(|n| (n.to_string(), String::new()))
            .collect();
        assert_eq!(ids(&newer), expected);
    }

    #[test]
    fn test_delete_by_identifier_removes_variants() {
        let (store, _clock, _temp) = create_test_store();
        let id = ImageId::new("photo1");
        store
            .store(bitmap(4, 4), &id, &VariantOptions::original(), true)
            .unwrap();
        store
            .store(bitmap(2, 2), &id, &VariantOptions::new("thumb"), false)
            .unwrap();
        store
            .store(bitmap(2, 2), &ImageId::new("other"), &VariantOptions::original(), true)
            .unwrap();

        assert_eq!(store.delete(&ImageRequest::variant("photo1", "thumb")).unwrap(), 1);
        assert_eq!(store.delete(&ImageRequest::variant("photo1", "thumb")).unwrap(), 0);

        store
            .store(bitmap(2, 2), &id, &VariantOptions::new("thumb"), false)
            .unwrap();
        assert_eq!(store.delete(&ImageRequest::identifier("photo1")).unwrap(), 2);
        assert_eq!(store.entry_count().unwrap(), 1);
        assert_eq!(store.delete(&ImageRequest::Undefined).unwrap(), 0);
    }

    #[test]
    fn test_delete_older_than_keeps_newer() {
        let (store, clock, _temp) = create_test_store();
        clock.set(10);
        store
            .store(bitmap(1, 1), &ImageId::new("a"), &VariantOptions::original(), true)
            .unwrap();
        clock.set(20);
        store
            .store(bitmap(1, 1), &ImageId::new("b"), &VariantOptions::original(), true)
            .unwrap();

        assert_eq!(store.delete(&ImageRequest::older_than(epoch_secs(15))).unwrap(), 1);
        assert!(store.lookup(&ImageRequest::identifier("a")).unwrap().is_empty());
        assert_eq!(store.lookup(&ImageRequest::identifier("b")).unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_keeps_entries() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = ImageStore::open(temp_dir.path(), StoreSettings::default()).unwrap();
            store
                .store(bitmap(3, 3), &ImageId::new("kept"), &VariantOptions::original(), true)
                .unwrap();
        }

        let store = ImageStore::open(temp_dir.path(), StoreSettings::default()).unwrap();
        assert_eq!(store.lookup(&ImageRequest::identifier("kept")).unwrap().len(), 1);
    }

    #[test]
    fn test_resolve_any_refreshes_only_returned_row() {
        let (store, clock, _temp) = create_test_store();
        let id = ImageId::new("photo1");

        clock.set(10);
        store
            .store(bitmap(8, 8), &id, &VariantOptions::original(), true)
            .unwrap();
        store
            .store(bitmap(2, 2), &id, &VariantOptions::new("thumb"), false)
            .unwrap();

        clock.set(50);
        let found = store
            .resolve_any(&id, &VariantOptions::new("missing"))
            .unwrap()
            .unwrap();
        assert!(found.is_original);
        assert_eq!(found.last_access, epoch_secs(50));

        let stale = store.lookup(&ImageRequest::older_than(epoch_secs(20))).unwrap();
        assert_eq!(
            ids(&stale),
            HashSet::from([("photo1".to_string(), "thumb".to_string())])
        );

        let exact = store
            .resolve_any(&id, &VariantOptions::new("thumb"))
            .unwrap()
            .unwrap();
        assert_eq!(exact.options.as_str(), "thumb");
        assert!(
            store
                .resolve_any(&ImageId::new("nope"), &VariantOptions::original())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_full_map_is_storage_fault() {
        let temp_dir = TempDir::new().unwrap();
        let store = ImageStore::open_with(
            temp_dir.path(),
            StoreSettings { map_size_mb: 1 },
            Arc::new(StandardCodec::png()),
            Arc::new(ManualClock::at(0)),
        )
        .unwrap();
        store
            .store(bitmap(4, 4), &ImageId::new("small"), &VariantOptions::original(), true)
            .unwrap();

        // Noise does not compress, so the payload is several times the map size.
        let mut state: u32 = 0x9E37_79B9;
        let noise = image::RgbImage::from_fn(1024, 1024, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let [r, g, b, _] = state.to_le_bytes();
            image::Rgb([r, g, b])
        });

        let err = store
            .store(
                DynamicImage::ImageRgb8(noise),
                &ImageId::new("huge"),
                &VariantOptions::original(),
                true,
            )
            .unwrap_err();

        assert!(err.is_storage_fault());
        assert_eq!(store.entry_count().unwrap(), 1);
        assert!(store.get(&ImageId::new("huge"), &VariantOptions::original()).unwrap().is_none());
    }

    #[test]
    fn test_open_on_file_is_storage_fault() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let err = ImageStore::open(&file, StoreSettings::default()).unwrap_err();
        assert!(err.is_storage_fault());
    }

    #[tokio::test]
    async fn test_async_forms_match_sync() {
        let (store, _clock, _temp) = create_test_store();

        store
            .store_async(bitmap(8, 8), ImageId::new("x"), VariantOptions::original(), true)
            .await
            .unwrap();
        let found = store.lookup_async(ImageRequest::identifier("x")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(store.original_async(ImageId::new("x")).await.unwrap().is_some());
        assert_eq!(store.entry_count_async().await.unwrap(), 1);
        assert_eq!(store.delete_async(ImageRequest::identifier("x")).await.unwrap(), 1);
        assert_eq!(store.entry_count_async().await.unwrap(), 0);
    }
}
