//! Key and row layout of the store.
//!
//! Primary key: `[u32 BE identifier length][identifier][options]`.
//! Entry row: `[version][flags][last access millis, i64 LE]`.
//! Access index key: `[last access millis, order-preserving BE][primary key]`.

use chrono::{DateTime, Utc};

use crate::domain::entities::{ImageId, VariantOptions};
use crate::domain::errors::{CacheError, CacheResult};

/// Layout version written into every entry row.
pub const RECORD_VERSION: u8 = 1;

const HEADER_LEN: usize = 10;
const LENGTH_PREFIX: usize = 4;
const INDEX_STAMP: usize = 8;
const SIGN_BIT: u64 = 1 << 63;

bitflags::bitflags! {
    /// Per-entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntryFlags: u8 {
        /// The entry is the original of its identifier.
        const ORIGINAL = 1 << 0;
    }
}

/// Metadata row of a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Entry flags.
    pub flags: EntryFlags,
    /// Last read or write, millisecond precision.
    pub last_access: DateTime<Utc>,
}

impl RecordHeader {
    /// Creates a header, truncating the access date to what is persisted.
    #[must_use]
    pub fn new(flags: EntryFlags, last_access: DateTime<Utc>) -> Self {
        Self {
            flags,
            last_access: truncate_to_millis(last_access),
        }
    }

    /// Returns true if the entry is an original.
    #[must_use]
    pub const fn is_original(&self) -> bool {
        self.flags.contains(EntryFlags::ORIGINAL)
    }

    /// Copy with a different access date.
    #[must_use]
    pub fn with_last_access(self, last_access: DateTime<Utc>) -> Self {
        Self::new(self.flags, last_access)
    }

    /// Copy with different flags.
    #[must_use]
    pub const fn with_flags(self, flags: EntryFlags) -> Self {
        Self {
            flags,
            last_access: self.last_access,
        }
    }

    /// Serialized row.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = RECORD_VERSION;
        buf[1] = self.flags.bits();
        buf[2..].copy_from_slice(&self.last_access.timestamp_millis().to_le_bytes());
        buf
    }

    /// Parses a row.
    ///
    /// # Errors
    /// Returns `StorageFault` for rows of another version or length.
    pub fn decode(bytes: &[u8]) -> CacheResult<Self> {
        if bytes.len() != HEADER_LEN {
            return Err(CacheError::storage(format!(
                "entry row has {} bytes, expected {HEADER_LEN}",
                bytes.len()
            )));
        }
        if bytes[0] != RECORD_VERSION {
            return Err(CacheError::storage(format!(
                "unsupported entry row version {}",
                bytes[0]
            )));
        }

        let flags = EntryFlags::from_bits_truncate(bytes[1]);
        let millis_bytes: [u8; 8] = bytes[2..]
            .try_into()
            .map_err(|_| CacheError::storage("invalid access timestamp"))?;
        let last_access = millis_to_date(i64::from_le_bytes(millis_bytes))?;

        Ok(Self { flags, last_access })
    }
}

/// Encodes the primary key of `(identifier, options)`.
///
/// # Errors
/// Returns `InvalidRequest` if the identifier is longer than `u32::MAX` bytes.
pub fn encode_key(identifier: &ImageId, options: &VariantOptions) -> CacheResult<Vec<u8>> {
    let mut key = identifier_prefix(identifier)?;
    key.extend_from_slice(options.as_str().as_bytes());
    Ok(key)
}

/// Prefix shared by every key of `identifier`.
///
/// # Errors
/// Returns `InvalidRequest` if the identifier is longer than `u32::MAX` bytes.
pub fn identifier_prefix(identifier: &ImageId) -> CacheResult<Vec<u8>> {
    let id = identifier.as_str().as_bytes();
    let len = u32::try_from(id.len())
        .map_err(|_| CacheError::invalid_request("identifier is too long"))?;

    let mut prefix = Vec::with_capacity(LENGTH_PREFIX + id.len());
    prefix.extend_from_slice(&len.to_be_bytes());
    prefix.extend_from_slice(id);
    Ok(prefix)
}

/// Splits a primary key back into identifier and options.
///
/// # Errors
/// Returns `StorageFault` for malformed keys.
pub fn decode_key(key: &[u8]) -> CacheResult<(ImageId, VariantOptions)> {
    if key.len() < LENGTH_PREFIX {
        return Err(CacheError::storage("entry key is truncated"));
    }
    let (len_bytes, rest) = key.split_at(LENGTH_PREFIX);
    let len_bytes: [u8; LENGTH_PREFIX] = len_bytes
        .try_into()
        .map_err(|_| CacheError::storage("entry key is truncated"))?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if rest.len() < len {
        return Err(CacheError::storage("entry key identifier is truncated"));
    }

    let (id, options) = rest.split_at(len);
    let id = std::str::from_utf8(id)
        .map_err(|e| CacheError::storage(format!("entry key identifier is not UTF-8: {e}")))?;
    let options = std::str::from_utf8(options)
        .map_err(|e| CacheError::storage(format!("entry key options are not UTF-8: {e}")))?;

    Ok((ImageId::new(id), VariantOptions::new(options)))
}

/// Access index key of a primary key at `last_access`.
#[must_use]
pub fn index_key(last_access: DateTime<Utc>, primary: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(INDEX_STAMP + primary.len());
    key.extend_from_slice(&order_preserving(last_access.timestamp_millis()).to_be_bytes());
    key.extend_from_slice(primary);
    key
}

/// Splits an access index key into its date and primary key.
///
/// # Errors
/// Returns `StorageFault` for malformed keys.
pub fn decode_index_key(key: &[u8]) -> CacheResult<(DateTime<Utc>, &[u8])> {
    if key.len() < INDEX_STAMP {
        return Err(CacheError::storage("access index key is truncated"));
    }
    let (stamp, primary) = key.split_at(INDEX_STAMP);
    let stamp: [u8; INDEX_STAMP] = stamp
        .try_into()
        .map_err(|_| CacheError::storage("access index key is truncated"))?;
    let millis = restore_order_preserving(u64::from_be_bytes(stamp));
    Ok((millis_to_date(millis)?, primary))
}

/// Drops sub-millisecond precision.
#[must_use]
pub fn truncate_to_millis(date: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(date.timestamp_millis()).unwrap_or(date)
}

fn millis_to_date(millis: i64) -> CacheResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| CacheError::storage(format!("access timestamp {millis} is out of range")))
}

#[allow(clippy::cast_sign_loss)]
const fn order_preserving(millis: i64) -> u64 {
    (millis as u64) ^ SIGN_BIT
}

#[allow(clippy::cast_possible_wrap)]
const fn restore_order_preserving(stamp: u64) -> i64 {
    (stamp ^ SIGN_BIT) as i64
}
