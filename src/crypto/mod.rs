//! Cryptography module
//!
//! Provides the two cryptographic primitives the cache engine consumes:
//! - RSA modular exponentiation for the checksum table's encrypted trailer
//! - Whirlpool digests for per-entry and per-table integrity checks

pub mod rsa;
pub mod whirlpool_digest;

pub use rsa::rsa_modpow;
pub use whirlpool_digest::whirlpool;
