//! Error types for the memkit library.
//!
//! ## Key Components
//!
//! - [`ConfigError`]: Returned when cache configuration parameters are
//!   invalid (e.g. zero shard count requested through `try_` constructors).
//! - [`NotNumericError`]: Returned by `incr`/`decr` when the stored payload
//!   does not parse as a decimal unsigned integer. The protocol layer maps
//!   this to a `CLIENT_ERROR` response.
//! - [`DecodeError`]: Returned when a serialized element buffer is
//!   truncated or internally inconsistent.
//!
//! Miss-class outcomes (`NOT_FOUND`, `NOT_STORED`, `EXISTS`) are not
//! errors; they are ordinary enum values on the cache API.

use std::fmt;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when cache configuration parameters are invalid.
///
/// Produced by fallible constructors such as
/// [`CacheBuilder::try_shards`](crate::builder::CacheBuilder::try_shards).
/// Carries a human-readable description of which parameter failed
/// validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(String);

impl ConfigError {
    /// Creates a new `ConfigError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// NotNumericError
// ---------------------------------------------------------------------------

/// Error returned when an `incr`/`decr` payload is not a decimal unsigned
/// integer.
///
/// The stored value is left untouched when this is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotNumericError;

impl fmt::Display for NotNumericError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("cannot increment or decrement non-numeric value")
    }
}

impl std::error::Error for NotNumericError {}

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// Error returned when deserializing an element from a wire buffer fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError(String);

impl DecodeError {
    /// Creates a new `DecodeError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DecodeError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_display_shows_message() {
        let err = ConfigError::new("shards must be > 0");
        assert_eq!(err.to_string(), "shards must be > 0");
        assert_eq!(err.message(), "shards must be > 0");
    }

    #[test]
    fn not_numeric_display() {
        let err = NotNumericError;
        assert!(err.to_string().contains("non-numeric"));
    }

    #[test]
    fn decode_display_shows_message() {
        let err = DecodeError::new("buffer truncated reading key");
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn errors_implement_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<ConfigError>();
        assert_error::<NotNumericError>();
        assert_error::<DecodeError>();
    }

    #[test]
    fn clone_and_eq() {
        let a = ConfigError::new("x");
        assert_eq!(a.clone(), a);
        let d = DecodeError::new("y");
        assert_eq!(d.clone(), d);
    }
}
