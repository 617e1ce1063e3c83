//! Immutable byte view over cached values
//!
//! `ByteView` is the only value type the cache stores and returns. It wraps
//! [`bytes::Bytes`], so clones are reference-counted and the backing storage
//! is never writable. Anything handed back to a caller as a mutable buffer
//! goes through [`ByteView::to_vec`], which copies.

use bytes::Bytes;

/// Immutable view of a cached byte sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteView {
    data: Bytes,
}

impl ByteView {
    /// Create a view by copying the given slice
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            data: Bytes::copy_from_slice(data),
        }
    }

    /// Length of the underlying bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the view is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Owned copy of the bytes; mutating it never affects the stored value
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// Borrow the bytes read-only
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(data: Vec<u8>) -> Self {
        // Ownership moves in, so no caller-held alias can exist.
        Self {
            data: Bytes::from(data),
        }
    }
}

impl From<&[u8]> for ByteView {
    fn from(data: &[u8]) -> Self {
        Self::copy_from_slice(data)
    }
}

impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        Self::copy_from_slice(data.as_bytes())
    }
}

impl std::fmt::Display for ByteView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.data))
    }
}

// =============================================================================
// Tests
// =============================================================================
