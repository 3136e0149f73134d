//! Length-prefixed short string used by the 0-8/0-10 framing.
//!
//! Wire form is one unsigned length octet followed by exactly that many
//! octets. A length of 0 decodes as null.
//!
//! # Example
//!
//! ```
//! use amqp_broker_core::codec::ShortString;
//! use bytes::{Bytes, BytesMut};
//!
//! let s = ShortString::try_from("queue.a").unwrap();
//! let mut buf = BytesMut::new();
//! s.encode(&mut buf);
//!
//! let (decoded, consumed) = ShortString::decode(&buf.freeze()).unwrap();
//! assert_eq!(decoded, Some(s));
//! assert_eq!(consumed, 8);
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::DecodeError;

/// Maximum number of octets a short string can carry.
pub const MAX_LENGTH: usize = 255;

const TRUNCATION_SUFFIX: &str = "...";

/// Immutable byte string of at most 255 octets.
///
/// The bytes may be a view into a larger buffer. Equality, hashing and
/// ordering only look at the viewed octets. Hash and string form are
/// computed on first use and cached.
#[derive(Clone)]
pub struct ShortString {
    bytes: Bytes,
    hash: OnceLock<u32>,
    string: OnceLock<String>,
}

impl ShortString {
    /// The zero-length short string.
    #[allow(clippy::declare_interior_mutable_const)]
    pub const EMPTY: ShortString = ShortString {
        bytes: Bytes::from_static(b""),
        hash: OnceLock::new(),
        string: OnceLock::new(),
    };

    /// Wrap bytes without copying. Fails above 255 octets.
    pub fn from_bytes(bytes: Bytes) -> Result<Self, DecodeError> {
        if bytes.len() > MAX_LENGTH {
            return Err(DecodeError::ShortStringTooLong(bytes.len()));
        }
        Ok(Self::wrap(bytes))
    }

    /// Build from a static string. Fails above 255 octets.
    pub fn from_static(s: &'static str) -> Result<Self, DecodeError> {
        Self::from_bytes(Bytes::from_static(s.as_bytes()))
    }

    /// Build from a string, truncating oversize values to 255 octets
    /// ending in `...`.
    pub fn from_str_truncated(s: &str) -> Self {
        if s.len() <= MAX_LENGTH {
            return Self::wrap(Bytes::copy_from_slice(s.as_bytes()));
        }

        let mut cut = MAX_LENGTH - TRUNCATION_SUFFIX.len();
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        let mut truncated = String::with_capacity(MAX_LENGTH);
        truncated.push_str(&s[..cut]);
        truncated.push_str(TRUNCATION_SUFFIX);
        Self::wrap(Bytes::from(truncated))
    }

    fn wrap(bytes: Bytes) -> Self {
        Self {
            bytes,
            hash: OnceLock::new(),
            string: OnceLock::new(),
        }
    }

    /// Decode a short string from the start of `buf`.
    ///
    /// Returns the value and the number of bytes consumed. The result is a
    /// view into `buf`, no copy is made.
    ///
    /// A length octet of 0 decodes as `None`: the wire form cannot tell an
    /// empty string from null, so [`ShortString::EMPTY`] encodes to `[0]`
    /// and comes back as `None`.
    pub fn decode(buf: &Bytes) -> Result<(Option<ShortString>, usize), DecodeError> {
        let Some(&len) = buf.first() else {
            return Err(DecodeError::InsufficientData { needed: 1 });
        };
        let len = len as usize;
        if len == 0 {
            return Ok((None, 1));
        }

        let available = buf.len() - 1;
        if available < len {
            return Err(DecodeError::InsufficientData {
                needed: len - available,
            });
        }

        Ok((Some(Self::wrap(buf.slice(1..1 + len))), 1 + len))
    }

    /// Append the wire form to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_size());
        buf.put_u8(self.bytes.len() as u8);
        buf.put_slice(&self.bytes);
    }

    /// Append the wire form of an optional short string; `None` is length 0.
    pub fn encode_optional(value: Option<&ShortString>, buf: &mut BytesMut) {
        match value {
            Some(s) => s.encode(buf),
            None => buf.put_u8(0),
        }
    }

    /// Number of bytes `encode` writes.
    #[inline]
    pub fn encoded_size(&self) -> usize {
        1 + self.bytes.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// True if any octet equals `b`.
    pub fn contains(&self, b: u8) -> bool {
        self.bytes.contains(&b)
    }

    /// String form, decoded lossily as UTF-8 once and cached.
    pub fn as_str(&self) -> &str {
        self.string
            .get_or_init(|| String::from_utf8_lossy(&self.bytes).into_owned())
    }

    /// Polynomial hash over the octets, computed once.
    pub fn hash_code(&self) -> u32 {
        *self.hash.get_or_init(|| {
            self.bytes
                .iter()
                .fold(0u32, |h, &b| h.wrapping_mul(31).wrapping_add(b as u32))
        })
    }
}

impl PartialEq for ShortString {
    fn eq(&self, other: &Self) -> bool {
        if self.bytes.len() != other.bytes.len() {
            return false;
        }
        if let (Some(a), Some(b)) = (self.hash.get(), other.hash.get()) {
            if a != b {
                return false;
            }
        }
        self.bytes[..] == other.bytes[..]
    }
}

impl Eq for ShortString {}

impl Hash for ShortString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash_code());
    }
}

impl PartialOrd for ShortString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ShortString {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes[..].cmp(&other.bytes[..])
    }
}

impl TryFrom<&str> for ShortString {
    type Error = DecodeError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::from_bytes(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl TryFrom<&[u8]> for ShortString {
    type Error = DecodeError;

    fn try_from(b: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(Bytes::copy_from_slice(b))
    }
}

impl fmt::Display for ShortString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ShortString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ShortString").field(&self.as_str()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;

    fn std_hash(s: &ShortString) -> u64 {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_roundtrip_all_lengths() {
        for len in 1..=MAX_LENGTH {
            let raw: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let original = ShortString::try_from(&raw[..]).unwrap();

            let mut buf = BytesMut::new();
            original.encode(&mut buf);
            assert_eq!(buf.len(), len + 1);

            let (decoded, consumed) = ShortString::decode(&buf.freeze()).unwrap();
            assert_eq!(consumed, len + 1);
            assert_eq!(decoded.unwrap(), original);
        }
    }

    #[test]
    fn test_roundtrip_empty_is_null() {
        let mut buf = BytesMut::new();
        ShortString::EMPTY.encode(&mut buf);
        assert_eq!(&buf[..], &[0]);

        let (decoded, consumed) = ShortString::decode(&buf.freeze()).unwrap();
        assert_eq!(consumed, 1);
        assert!(decoded.is_none());
    }

    #[test]
    fn test_offset_view_equals_exact_copy() {
        // Arrange: same content, one inside a larger buffer
        let backing = Bytes::from_static(b"xxxhello-worldyyyy");
        let view = ShortString::from_bytes(backing.slice(3..14)).unwrap();
        let exact = ShortString::try_from("hello-world").unwrap();

        // Assert: equal both ways, same hashes
        assert_eq!(view, exact);
        assert_eq!(exact, view);
        assert_eq!(view.hash_code(), exact.hash_code());
        assert_eq!(std_hash(&view), std_hash(&exact));

        let mut set = HashSet::new();
        set.insert(view);
        assert!(set.contains(&exact));
    }

    #[test]
    fn test_cached_hash_mismatch_short_circuits() {
        let a = ShortString::try_from("abc").unwrap();
        let b = ShortString::try_from("abd").unwrap();
        a.hash_code();
        b.hash_code();
        assert_ne!(a, b);
    }

    #[test]
    fn test_zero_length_decodes_as_null() {
        let (decoded, consumed) = ShortString::decode(&Bytes::from_static(&[0])).unwrap();
        assert!(decoded.is_none());
        assert_eq!(consumed, 1);
    }

    #[test]
    fn test_encode_optional_none() {
        let mut buf = BytesMut::new();
        ShortString::encode_optional(None, &mut buf);
        assert_eq!(&buf[..], &[0]);
    }

    #[test]
    fn test_declared_length_exceeds_buffer() {
        let buf = Bytes::from_static(&[5, b'a', b'b']);
        let err = ShortString::decode(&buf).unwrap_err();
        assert_eq!(err, DecodeError::InsufficientData { needed: 3 });

        let err = ShortString::decode(&Bytes::new()).unwrap_err();
        assert!(err.is_insufficient());
    }

    #[test]
    fn test_too_long_rejected() {
        let raw = vec![b'a'; 256];
        let err = ShortString::try_from(&raw[..]).unwrap_err();
        assert_eq!(err, DecodeError::ShortStringTooLong(256));
    }

    #[test]
    fn test_ordinal_ordering() {
        let a = ShortString::try_from("abc").unwrap();
        let ab = ShortString::try_from("abcd").unwrap();
        let b = ShortString::try_from("abd").unwrap();
        let high = ShortString::try_from(&[0xff][..]).unwrap();

        // Strict prefix sorts first
        assert!(a < ab);
        assert!(ab < b);
        // Bytes compare unsigned
        assert!(b < high);
        assert_eq!(a.cmp(&a.clone()), Ordering::Equal);
    }

    #[test]
    fn test_truncated_value() {
        let long = "x".repeat(300);
        let s = ShortString::from_str_truncated(&long);
        assert_eq!(s.len(), MAX_LENGTH);
        assert!(s.as_str().ends_with("..."));

        let short = ShortString::from_str_truncated("short");
        assert_eq!(short.as_str(), "short");
    }

    #[test]
    fn test_truncation_respects_char_boundary() {
        let long = "é".repeat(200);
        let s = ShortString::from_str_truncated(&long);
        assert!(s.len() <= MAX_LENGTH);
        assert!(std::str::from_utf8(s.as_bytes()).is_ok());
    }

    #[test]
    fn test_accessors() {
        let s = ShortString::try_from("a.b").unwrap();
        assert!(s.contains(b'.'));
        assert!(!s.contains(b'/'));
        assert_eq!(s.to_vec(), b"a.b".to_vec());
        assert_eq!(s.as_str(), "a.b");
        assert_eq!(s.to_string(), "a.b");
        assert!(ShortString::EMPTY.is_empty());
        assert_eq!(ShortString::EMPTY.encoded_size(), 1);
    }
}
