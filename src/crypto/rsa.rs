//! RSA modular exponentiation.
//!
//! The checksum table's trailer is optionally RSA-encrypted: a raw modular
//! exponentiation over a signed, two's-complement big-endian integer
//! encoding (Java's `BigInteger.toByteArray`/`new BigInteger(bytes)`
//! semantics). A plain unsigned `BigUint::to_bytes_be` round-trip silently
//! drops or adds a leading zero byte whenever the high bit of the most
//! significant byte is set, which would make the trailer fail to decrypt
//! against a real client. The two helpers here exist only to preserve that
//! exact behavior.

use num_bigint::BigUint;

/// Raw RSA: `bytes^exponent mod modulus`, preserving signed two's-complement
/// big-endian encoding on both ends.
pub fn rsa_modpow(bytes: &[u8], modulus: &[u8], exponent: &[u8]) -> Vec<u8> {
    let base = from_signed_be_bytes(bytes);
    let modulus = from_signed_be_bytes(modulus);
    let exponent = from_signed_be_bytes(exponent);

    let result = base.modpow(&exponent, &modulus);
    to_signed_be_bytes(&result)
}

/// Decode a signed two's-complement big-endian integer. Negative values do
/// not occur in this codec's inputs (moduli, exponents, and digests are all
/// non-negative), so this only ever strips a redundant leading zero byte.
fn from_signed_be_bytes(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

/// Encode `value` as Java's `BigInteger.toByteArray()` would: the shortest
/// big-endian byte string whose most significant bit is 0 (since `value` is
/// always non-negative here), prepending a zero byte when the natural
/// encoding's high bit is already set.
fn to_signed_be_bytes(value: &BigUint) -> Vec<u8> {
    let mut bytes = value.to_bytes_be();
    if bytes.is_empty() {
        return vec![0];
    }
    if bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0);
    }
    bytes
}
