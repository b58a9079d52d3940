//! Cache lookup keys.
//!
//! A [`Key`] is an immutable byte string with a hash precomputed at
//! construction. Keys are cheap to clone: the underlying buffer is a
//! reference-counted [`Bytes`] slice, and the wrapper carries only the
//! view plus the cached hash.
//!
//! ## Key Concepts
//!
//! - **Byte-content equality**: two keys compare equal iff their bytes do,
//!   regardless of how the buffers were produced.
//! - **Precomputed hash**: hashing a key on every map probe would re-walk
//!   the bytes; the hash is computed once and replayed via `write_u64`.
//! - **Lossy display**: `Display` renders UTF-8 best-effort and exists only
//!   for logs; it never round-trips.
//!
//! ## Example Usage
//!
//! ```
//! use memkit::Key;
//!
//! let a = Key::from("user:42");
//! let b = Key::from(&b"user:42"[..]);
//! assert_eq!(a, b);
//! assert_eq!(a.to_string(), "user:42");
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use rustc_hash::FxHasher;

/// An immutable binary key with a precomputed hash.
///
/// Equality and hashing are based on byte content. The hash is computed
/// once with [`FxHasher`] when the key is built and cached alongside the
/// buffer, so map probes and shard selection never re-hash the bytes.
#[derive(Debug, Clone)]
pub struct Key {
    bytes: Bytes,
    hash: u64,
}

impl Key {
    /// Creates a key from a shared byte buffer.
    pub fn new(bytes: Bytes) -> Self {
        let mut hasher = FxHasher::default();
        hasher.write(&bytes);
        let hash = hasher.finish();
        Self { bytes, hash }
    }

    /// Returns the key's bytes.
    #[inline]
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Returns the key length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the key is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns the cached hash value.
    #[inline]
    pub(crate) fn precomputed_hash(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.bytes == other.bytes
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for Key {
    /// Lossy UTF-8 rendering, for logs only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}

impl From<Bytes> for Key {
    fn from(bytes: Bytes) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(bytes))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::new(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(Bytes::from(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn std_hash(key: &Key) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn equality_is_byte_content_based() {
        let a = Key::from("abc");
        let b = Key::from(&b"abc"[..]);
        let c = Key::from("abd");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn equal_keys_hash_equal() {
        let a = Key::from("hello");
        let b = Key::new(Bytes::from_static(b"hello"));

        assert_eq!(a.precomputed_hash(), b.precomputed_hash());
        assert_eq!(std_hash(&a), std_hash(&b));
    }

    #[test]
    fn clone_shares_buffer_and_hash() {
        let a = Key::from("shared");
        let b = a.clone();

        assert_eq!(a, b);
        assert_eq!(a.precomputed_hash(), b.precomputed_hash());
    }

    #[test]
    fn display_is_lossy_utf8() {
        assert_eq!(Key::from("plain").to_string(), "plain");

        let invalid = Key::from(&[0x66, 0x6f, 0xff][..]);
        let rendered = invalid.to_string();
        assert!(rendered.starts_with("fo"));
    }

    #[test]
    fn empty_key() {
        let key = Key::from("");
        assert!(key.is_empty());
        assert_eq!(key.len(), 0);
    }
}
