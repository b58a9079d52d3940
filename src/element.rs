//! Stored cache values.
//!
//! An [`Element`] is the value record the cache stores per key: an opaque
//! payload plus the metadata memcached commands act on (flags, absolute
//! expiry, CAS token, delete-block state).
//!
//! ## Architecture
//!
//! ```text
//!   Element (immutable once stored)
//!   ┌───────────────┬──────────────────────────────────────────────┐
//!   │ key           │ Key (shared with the map entry)              │
//!   │ data          │ Bytes — opaque payload                       │
//!   │ flags         │ u32  — opaque to the cache                   │
//!   │ expire        │ i64  — absolute ms since epoch, 0 = never    │
//!   │ cas           │ u64  — stamped by the cache on every store   │
//!   │ blocked       │ bool — delayed-delete placeholder marker     │
//!   │ blocked_until │ i64  — ms deadline while blocked             │
//!   └───────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! Elements are never mutated in place once they are in the map; semantic
//! updates ([`append`](Element::append), [`prepend`](Element::prepend),
//! [`incr_decr`](Element::incr_decr)) produce a fresh element which the
//! cache swaps in atomically. The CAS token on a derived element is left
//! at the default; the cache stamps the real token after a successful
//! swap.
//!
//! ## Wire Format
//!
//! [`write_to_buffer`](Element::write_to_buffer) /
//! [`read_from_buffer`](Element::read_from_buffer) encode a big-endian,
//! unpadded snapshot:
//!
//! ```text
//!   i32 total_size | i64 expire | i32 key_len | key | u32 flags
//!   | i32 data_len | data | u64 cas | u8 blocked | i64 blocked_until
//! ```
//!
//! The CAS field is the full 64 bits, so the round-trip is lossless.
//!
//! ## Example Usage
//!
//! ```
//! use bytes::Bytes;
//! use memkit::{Element, Key};
//!
//! let mut e = Element::new(Key::from("counter"), 0, 0);
//! e.set_data(Bytes::from_static(b"10"));
//!
//! let (value, bumped) = e.incr_decr(5).unwrap();
//! assert_eq!(value, 15);
//! assert_eq!(&bumped.data()[..], b"15");
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DecodeError, NotNumericError};
use crate::key::Key;

/// Thirty days in milliseconds.
///
/// Memcached treats an expiry value at or below this as a relative offset
/// and anything larger as an absolute timestamp. The cutoff belongs to the
/// protocol layer; it is defined here because it is a property of the
/// element's `expire` field.
pub const THIRTY_DAYS_MILLIS: i64 = 2_592_000_000;

/// A stored cache value: opaque payload plus memcached metadata.
///
/// See the [module docs](self) for field semantics and lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    key: Key,
    data: Bytes,
    flags: u32,
    expire: i64,
    cas: u64,
    blocked: bool,
    blocked_until: i64,
}

impl Element {
    /// Creates an element with an empty payload.
    ///
    /// `expire` is an absolute timestamp in milliseconds since the epoch;
    /// `0` means "no expiry".
    pub fn new(key: Key, flags: u32, expire: i64) -> Self {
        Self {
            key,
            data: Bytes::new(),
            flags,
            expire,
            cas: 0,
            blocked: false,
            blocked_until: 0,
        }
    }

    /// Creates an element with the given payload.
    pub fn with_data(key: Key, flags: u32, expire: i64, data: Bytes) -> Self {
        let mut element = Self::new(key, flags, expire);
        element.data = data;
        element
    }

    /// Replaces the payload.
    pub fn set_data(&mut self, data: Bytes) {
        self.data = data;
    }

    /// Returns the element's key.
    #[inline]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Returns the payload.
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Returns the client-supplied flags.
    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Returns the absolute expiry in ms since epoch; `0` means no expiry.
    #[inline]
    pub fn expire(&self) -> i64 {
        self.expire
    }

    /// Returns the CAS token stamped by the cache.
    #[inline]
    pub fn cas(&self) -> u64 {
        self.cas
    }

    /// Returns `true` if this element is a delayed-delete placeholder.
    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Returns the block deadline in ms since epoch.
    #[inline]
    pub fn blocked_until(&self) -> i64 {
        self.blocked_until
    }

    /// Returns the payload size in bytes, the unit of memory accounting.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Stamps the CAS token. Only the cache assigns tokens.
    #[inline]
    pub(crate) fn set_cas(&mut self, cas: u64) {
        self.cas = cas;
    }

    /// Marks this element as a delete-block placeholder until the given
    /// deadline (ms since epoch).
    pub fn block(&mut self, blocked_until: i64) {
        self.blocked = true;
        self.blocked_until = blocked_until;
    }

    /// Returns `true` if the element has an expiry in the past.
    #[inline]
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        self.expire != 0 && self.expire < now_millis
    }

    /// Returns `true` if the element is a placeholder whose block deadline
    /// has not yet passed.
    #[inline]
    pub fn is_blocked_at(&self, now_millis: i64) -> bool {
        self.blocked && self.blocked_until > now_millis
    }

    /// Returns a new element whose payload is `self.data ++ other.data`.
    ///
    /// Flags and expiry are inherited from `self`; the CAS token is left at
    /// the default for the cache to stamp after the swap.
    pub fn append(&self, other: &Element) -> Element {
        let mut data = BytesMut::with_capacity(self.data.len() + other.data.len());
        data.put_slice(&self.data);
        data.put_slice(&other.data);
        Element::with_data(self.key.clone(), self.flags, self.expire, data.freeze())
    }

    /// Returns a new element whose payload is `other.data ++ self.data`.
    ///
    /// Mirror of [`append`](Element::append).
    pub fn prepend(&self, other: &Element) -> Element {
        let mut data = BytesMut::with_capacity(self.data.len() + other.data.len());
        data.put_slice(&other.data);
        data.put_slice(&self.data);
        Element::with_data(self.key.clone(), self.flags, self.expire, data.freeze())
    }

    /// Applies a signed delta to the payload interpreted as a decimal
    /// unsigned integer.
    ///
    /// Returns the new value and a replacement element carrying it in
    /// decimal ASCII. Decrements clamp to 0 on underflow; increments wrap
    /// at `u64::MAX` the way memcached's 64-bit counters do. A payload
    /// that does not parse as a decimal unsigned integer returns
    /// [`NotNumericError`] and leaves the stored value untouched.
    pub fn incr_decr(&self, delta: i64) -> Result<(u64, Element), NotNumericError> {
        let text = std::str::from_utf8(&self.data).map_err(|_| NotNumericError)?;
        let current: u64 = text.parse().map_err(|_| NotNumericError)?;

        let next = if delta >= 0 {
            current.wrapping_add(delta as u64)
        } else {
            current.saturating_sub(delta.unsigned_abs())
        };

        let replacement = Element::with_data(
            self.key.clone(),
            self.flags,
            self.expire,
            Bytes::from(next.to_string()),
        );
        Ok((next, replacement))
    }

    // -----------------------------------------------------------------------
    // Wire format
    // -----------------------------------------------------------------------

    /// Returns the encoded length of [`write_to_buffer`](Element::write_to_buffer).
    pub fn buffer_size(&self) -> usize {
        // total_size + expire + key_len + key + flags + data_len + data
        //   + cas + blocked + blocked_until
        4 + 8 + 4 + self.key.len() + 4 + 4 + self.data.len() + 8 + 1 + 8
    }

    /// Encodes the element into `out` in the big-endian wire layout.
    pub fn write_to_buffer<B: BufMut>(&self, out: &mut B) {
        out.put_i32(self.buffer_size() as i32);
        out.put_i64(self.expire);
        out.put_i32(self.key.len() as i32);
        out.put_slice(self.key.bytes());
        out.put_u32(self.flags);
        out.put_i32(self.data.len() as i32);
        out.put_slice(&self.data);
        out.put_u64(self.cas);
        out.put_u8(u8::from(self.blocked));
        out.put_i64(self.blocked_until);
    }

    /// Decodes an element previously written by
    /// [`write_to_buffer`](Element::write_to_buffer).
    pub fn read_from_buffer<B: Buf>(input: &mut B) -> Result<Element, DecodeError> {
        let total_size = read_i32(input, "total size")?;
        if total_size < 0 {
            return Err(DecodeError::new("negative total size"));
        }

        let expire = read_i64(input, "expiry")?;
        let key_len = read_len(input, "key length")?;
        let key = Key::new(read_bytes(input, key_len, "key")?);

        let flags = {
            if input.remaining() < 4 {
                return Err(DecodeError::new("buffer truncated reading flags"));
            }
            input.get_u32()
        };

        let data_len = read_len(input, "data length")?;
        let data = read_bytes(input, data_len, "data")?;

        let cas = {
            if input.remaining() < 8 {
                return Err(DecodeError::new("buffer truncated reading cas"));
            }
            input.get_u64()
        };

        let blocked = {
            if input.remaining() < 1 {
                return Err(DecodeError::new("buffer truncated reading blocked flag"));
            }
            input.get_u8() == 1
        };
        let blocked_until = read_i64(input, "block deadline")?;

        let mut element = Element::with_data(key, flags, expire, data);
        element.cas = cas;
        element.blocked = blocked;
        element.blocked_until = blocked_until;
        Ok(element)
    }
}

fn read_i32<B: Buf>(input: &mut B, what: &str) -> Result<i32, DecodeError> {
    if input.remaining() < 4 {
        return Err(DecodeError::new(format!("buffer truncated reading {what}")));
    }
    Ok(input.get_i32())
}

fn read_i64<B: Buf>(input: &mut B, what: &str) -> Result<i64, DecodeError> {
    if input.remaining() < 8 {
        return Err(DecodeError::new(format!("buffer truncated reading {what}")));
    }
    Ok(input.get_i64())
}

fn read_len<B: Buf>(input: &mut B, what: &str) -> Result<usize, DecodeError> {
    let len = read_i32(input, what)?;
    usize::try_from(len).map_err(|_| DecodeError::new(format!("negative {what}")))
}

fn read_bytes<B: Buf>(input: &mut B, len: usize, what: &str) -> Result<Bytes, DecodeError> {
    if input.remaining() < len {
        return Err(DecodeError::new(format!("buffer truncated reading {what}")));
    }
    Ok(input.copy_to_bytes(len))
}
