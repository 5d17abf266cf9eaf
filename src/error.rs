//! Error handling module
//!
//! Defines the error taxonomy for the cache engine.

use std::io;

use thiserror::Error;

/// Error type for all cache engine operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A required cache file was missing when opening a directory.
    #[error("cache not found at: {0}")]
    CacheNotFound(String),

    /// `type` was outside `[0, type_count)` and was not the reserved meta type.
    #[error("no such type: {0}")]
    NoSuchType(u8),

    /// The requested entry does not exist.
    #[error("not found: type {type_}, id {id}")]
    NotFound { type_: u8, id: u32 },

    /// A 6-byte index frame failed to decode.
    #[error("malformed index entry ({length} bytes, expected 6)")]
    MalformedIndex { length: usize },

    /// A 520-byte sector frame failed to decode.
    #[error("malformed sector ({length} bytes, expected {expected})")]
    MalformedSector { length: usize, expected: usize },

    /// A sector chain failed structural validation, or a length/version
    /// invariant the container format requires was violated.
    #[error("corrupt: {0}")]
    Corrupt(String),

    /// A stored digest did not match the one computed over the bytes it
    /// covers: a checksum-table trailer's embedded Whirlpool digest against
    /// the table body, or (under `CacheConfig::strict_digests`) a reference
    /// table entry's CRC32/Whirlpool against an existing on-disk entry.
    #[error("digest mismatch")]
    DigestMismatch,

    /// A caller-supplied Whirlpool digest was not exactly 64 bytes.
    #[error("invalid digest size: {0} bytes (expected 64)")]
    InvalidDigestSize(usize),

    /// A `Cache` operation was attempted against the reserved meta type (255).
    #[error("type 255 is reserved for low-level access")]
    ReservedType,

    /// A container's compression byte was not one of {0, 1, 2}.
    #[error("unsupported compression type: {0}")]
    UnsupportedCompression(u8),

    /// A compressed payload decompressed to a length other than the one
    /// declared in its container header.
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// An underlying file-system error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for cache engine operations.
pub type Result<T> = std::result::Result<T, CacheError>;
