//! Whirlpool digests.
//!
//! The legacy format's optional per-entry and per-table integrity checks
//! use the 512-bit Whirlpool hash rather than a modern cryptographic hash.
//! Grounded on the `whirlpool` crate's `Digest` trait implementation.

use whirlpool::{Digest, Whirlpool};

/// Compute the 64-byte Whirlpool digest of `bytes`.
pub fn whirlpool(bytes: &[u8]) -> [u8; 64] {
    let mut hasher = Whirlpool::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; 64];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(whirlpool(b"abc"), whirlpool(b"abc"));
    }

    #[test]
    fn digest_differs_for_different_input() {
        assert_ne!(whirlpool(b"abc"), whirlpool(b"abd"));
    }

    #[test]
    fn empty_input_has_a_stable_digest() {
        let digest = whirlpool(b"");
        assert_eq!(digest.len(), 64);
    }
}
