//! Checksum table codec.
//!
//! A digest-of-digests over every type's reference table, used by client
//! update protocols to detect stale or tampered indices. Decoding supports
//! a legacy (CRC+version only) mode and a whirlpool mode whose trailer can
//! optionally be RSA-encrypted.

use crate::crypto::{rsa_modpow, whirlpool};
use crate::error::{CacheError, Result};

/// One row of the checksum table: the digest of a single type's meta entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub crc: i32,
    pub version: i32,
    pub whirlpool: [u8; 64],
}

impl Entry {
    /// `whirlpool` must be exactly 64 bytes, matching the fixed digest size.
    pub fn new(crc: i32, version: i32, whirlpool: &[u8]) -> Result<Self> {
        if whirlpool.len() != 64 {
            return Err(CacheError::InvalidDigestSize(whirlpool.len()));
        }
        let mut digest = [0u8; 64];
        digest.copy_from_slice(whirlpool);
        Ok(Self { crc, version, whirlpool: digest })
    }

    fn zero(crc: i32, version: i32) -> Self {
        Self { crc, version, whirlpool: [0u8; 64] }
    }
}

/// RSA key material used to decrypt/encrypt a whirlpool-mode trailer.
#[derive(Debug, Clone)]
pub struct RsaKeys {
    pub modulus: Vec<u8>,
    pub exponent: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumTable {
    pub entries: Vec<Entry>,
}

impl ChecksumTable {
    pub fn new(size: usize) -> Self {
        Self { entries: vec![Entry::zero(0, 0); size] }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Decode in legacy mode: `u8 n` followed by `n × {crc, version}`.
    pub fn decode_legacy(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(CacheError::Corrupt("empty checksum table".into()));
        }
        let n = bytes[0] as usize;
        let mut pos = 1;
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            let crc = read_i32(bytes, &mut pos)?;
            let version = read_i32(bytes, &mut pos)?;
            entries.push(Entry::zero(crc, version));
        }
        Ok(Self { entries })
    }

    /// Encode in legacy mode.
    pub fn encode_legacy(&self) -> Result<Vec<u8>> {
        if self.entries.len() > u8::MAX as usize {
            return Err(CacheError::Corrupt("too many entries for legacy checksum table".into()));
        }
        let mut out = Vec::with_capacity(1 + self.entries.len() * 8);
        out.push(self.entries.len() as u8);
        for entry in &self.entries {
            out.extend_from_slice(&entry.crc.to_be_bytes());
            out.extend_from_slice(&entry.version.to_be_bytes());
        }
        Ok(out)
    }

    /// Decode in whirlpool mode: `n = remaining_len / 8` rows of
    /// `{crc, version, whirlpool[64]}`, followed by a trailer that is
    /// optionally RSA-encrypted. Unencrypted, the trailer is a fixed 66
    /// bytes; encrypted, its width on the wire is the modulus's byte length
    /// (the encryptor pads its raw modpow output up to that width, mirroring
    /// how the legacy RSA encryptor pads ciphertext to the key size). The
    /// embedded digest must match `whirlpool(body from offset 5)`, else
    /// `DigestMismatch`.
    pub fn decode_whirlpool(bytes: &[u8], rsa: Option<&RsaKeys>) -> Result<Self> {
        let trailer_len = rsa.map_or(66, |keys| keys.modulus.len());
        if bytes.len() < trailer_len + 1 {
            return Err(CacheError::Corrupt("whirlpool checksum table too short".into()));
        }

        let body_len = bytes.len() - trailer_len;
        let n = (body_len - 1) / 72;
        let mut pos = 1;
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            let crc = read_i32(bytes, &mut pos)?;
            let version = read_i32(bytes, &mut pos)?;
            let whirl = &bytes[pos..pos + 64];
            let entry = Entry::new(crc, version, whirl)?;
            pos += 64;
            entries.push(entry);
        }

        let trailer = &bytes[bytes.len() - trailer_len..];
        let mut decrypted = match rsa {
            Some(keys) => rsa_modpow(trailer, &keys.modulus, &keys.exponent),
            None => trailer.to_vec(),
        };

        if decrypted.len() > 66 {
            return Err(CacheError::Corrupt("malformed checksum table trailer".into()));
        }
        while decrypted.len() < 66 {
            decrypted.insert(0, 0);
        }

        if decrypted[0] != 0 || decrypted[65] != 0 {
            return Err(CacheError::Corrupt("malformed checksum table trailer".into()));
        }

        let expected = whirlpool(bytes.get(5..bytes.len() - trailer_len).unwrap_or(&[]));
        if decrypted[1..65] != expected {
            return Err(CacheError::DigestMismatch);
        }

        Ok(Self { entries })
    }

    /// Encode in whirlpool mode, optionally RSA-encrypting the trailer.
    pub fn encode_whirlpool(&self, rsa: Option<&RsaKeys>) -> Result<Vec<u8>> {
        if self.entries.len() > u8::MAX as usize {
            return Err(CacheError::Corrupt("too many entries for whirlpool checksum table".into()));
        }

        let mut body = Vec::with_capacity(1 + self.entries.len() * 72);
        body.push(self.entries.len() as u8);
        for entry in &self.entries {
            body.extend_from_slice(&entry.crc.to_be_bytes());
            body.extend_from_slice(&entry.version.to_be_bytes());
            body.extend_from_slice(&entry.whirlpool);
        }

        let digest = whirlpool(body.get(5..).unwrap_or(&[]));
        let mut trailer = Vec::with_capacity(66);
        trailer.push(0);
        trailer.extend_from_slice(&digest);
        trailer.push(0);

        let trailer = match rsa {
            Some(keys) => {
                let mut ciphertext = rsa_modpow(&trailer, &keys.modulus, &keys.exponent);
                while ciphertext.len() < keys.modulus.len() {
                    ciphertext.insert(0, 0);
                }
                ciphertext
            }
            None => trailer,
        };

        body.extend_from_slice(&trailer);
        Ok(body)
    }
}

fn read_i32(bytes: &[u8], pos: &mut usize) -> Result<i32> {
    let end = *pos + 4;
    let slice = bytes
        .get(*pos..end)
        .ok_or_else(|| CacheError::Corrupt("checksum table buffer truncated".into()))?;
    *pos = end;
    Ok(i32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}
