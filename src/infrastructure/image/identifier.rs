//! Content-hash identifiers.

use crate::domain::entities::ImageId;
use crate::domain::ports::IdentifierDeriver;

/// Names an image by the SHA-256 of its bytes (first 16 bytes, hex).
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHashIdentifier;

impl IdentifierDeriver for ContentHashIdentifier {
    fn derive(&self, bytes: &[u8]) -> Option<ImageId> {
        if bytes.is_empty() {
            return None;
        }
        Some(ImageId::from_content(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_bytes_same_identifier() {
        let deriver = ContentHashIdentifier;
        assert_eq!(deriver.derive(b"abc"), deriver.derive(b"abc"));
        assert_ne!(deriver.derive(b"abc"), deriver.derive(b"abd"));
    }

    #[test]
    fn test_empty_bytes_have_no_identifier() {
        assert!(ContentHashIdentifier.derive(&[]).is_none());
    }
}
