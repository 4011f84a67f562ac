//! Image cache error types.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur during cache operations.
///
/// `Clone` so a single generation outcome can be handed to every waiter.
/// A missing image is not an error; lookups report it as `None` or an empty list.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The backing store is unreachable, corrupt, or a transaction could not commit.
    #[error("storage fault: {0}")]
    StorageFault(String),

    /// An image was submitted without an identifier and none could be derived.
    #[error("an identifier is required to store this image")]
    IdentifierRequired,

    /// A derived variant could not be produced.
    #[error("variant generation failed: {0}")]
    GenerationFailure(String),

    /// An image payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    CodecError(String),

    /// The request cannot be served by the operation it was given to.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A background task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl CacheError {
    /// Creates a storage fault.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageFault(message.into())
    }

    /// Creates a generation failure.
    #[must_use]
    pub fn generation(message: impl Into<String>) -> Self {
        Self::GenerationFailure(message.into())
    }

    /// Creates a codec error.
    #[must_use]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::CodecError(message.into())
    }

    /// Creates an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Returns true for faults of the backing store.
    #[must_use]
    pub const fn is_storage_fault(&self) -> bool {
        matches!(self, Self::StorageFault(_))
    }
}

impl From<heed::Error> for CacheError {
    fn from(e: heed::Error) -> Self {
        Self::StorageFault(e.to_string())
    }
}

impl From<image::ImageError> for CacheError {
    fn from(e: image::ImageError) -> Self {
        Self::CodecError(e.to_string())
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Worker(e.to_string())
    }
}
