//! Identifier derivation port definition.

use crate::domain::entities::ImageId;

/// Derives a stable identifier from image bytes.
///
/// Implementations must be deterministic: equal bytes give equal identifiers.
pub trait IdentifierDeriver: Send + Sync {
    /// Returns `None` when no identifier can be derived.
    fn derive(&self, bytes: &[u8]) -> Option<ImageId>;
}

#[cfg(test)]
pub mod mock {
    use super::*;

    /// Deriver that never produces an identifier.
    pub struct NoIdentifier;

    impl IdentifierDeriver for NoIdentifier {
        fn derive(&self, _bytes: &[u8]) -> Option<ImageId> {
            None
        }
    }
}
