//! Container codec.
//!
//! A container frames a logical payload with a compression tag and an
//! optional version trailer. This is the unit the rest of the engine reads
//! and writes: entries in the data file, reference tables under the meta
//! type, and archives are all, at rest, containers.

use std::io::Read;

use bzip2::read::{BzDecoder, BzEncoder};
use bzip2::Compression as Bzip2Level;
use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression as GzipLevel;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// BZIP2 streams always carry this four-byte magic; the on-disk format
/// strips it since it is constant for every payload.
const BZIP2_MAGIC: &[u8; 4] = b"BZh1";

/// Compression applied to a container's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    Bzip2 = 1,
    Gzip = 2,
}

impl Compression {
    fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::None),
            1 => Ok(Self::Bzip2),
            2 => Ok(Self::Gzip),
            other => Err(CacheError::UnsupportedCompression(other)),
        }
    }
}

/// A decoded container: its compression kind, logical (decompressed)
/// payload, and an optional version trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub compression: Compression,
    pub data: Vec<u8>,
    pub version: Option<i32>,
}

impl Container {
    pub fn new(compression: Compression, data: Vec<u8>, version: Option<i32>) -> Self {
        Self { compression, data, version }
    }

    /// Decode a container frame.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 5 {
            return Err(CacheError::Corrupt("container shorter than 5-byte header".into()));
        }

        let compression = Compression::from_u8(bytes[0])?;
        let compressed_len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
        let mut pos = 5;

        let data = match compression {
            Compression::None => {
                let end = pos + compressed_len;
                let slice = bytes.get(pos..end).ok_or_else(|| {
                    CacheError::Corrupt("container payload shorter than declared length".into())
                })?;
                pos = end;
                slice.to_vec()
            }
            Compression::Bzip2 | Compression::Gzip => {
                if bytes.len() < pos + 4 {
                    return Err(CacheError::Corrupt("container missing uncompressed length".into()));
                }
                let uncompressed_len =
                    u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
                        as usize;
                pos += 4;

                let end = pos + compressed_len;
                let payload = bytes.get(pos..end).ok_or_else(|| {
                    CacheError::Corrupt("container payload shorter than declared length".into())
                })?;
                pos = end;

                let decompressed = match compression {
                    Compression::Bzip2 => decompress_bzip2(payload)?,
                    Compression::Gzip => decompress_gzip(payload)?,
                    Compression::None => unreachable!(),
                };

                if decompressed.len() != uncompressed_len {
                    return Err(CacheError::LengthMismatch {
                        expected: uncompressed_len,
                        actual: decompressed.len(),
                    });
                }
                decompressed
            }
        };

        let version = if bytes.len() - pos >= 2 {
            Some(i16::from_be_bytes([bytes[pos], bytes[pos + 1]]) as i32)
        } else {
            None
        };

        Ok(Self { compression, data, version })
    }

    /// Encode this container's logical payload into its on-disk frame.
    pub fn encode(&self) -> Vec<u8> {
        let (compressed, uncompressed_len) = match self.compression {
            Compression::None => (self.data.clone(), None),
            Compression::Bzip2 => (compress_bzip2(&self.data), Some(self.data.len())),
            Compression::Gzip => (compress_gzip(&self.data), Some(self.data.len())),
        };

        let mut out = Vec::with_capacity(5 + compressed.len() + 6);
        out.push(self.compression as u8);
        out.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
        if let Some(len) = uncompressed_len {
            out.extend_from_slice(&(len as u32).to_be_bytes());
        }
        out.extend_from_slice(&compressed);

        if let Some(version) = self.version {
            out.extend_from_slice(&(version as i16).to_be_bytes());
        }

        out
    }
}

fn decompress_bzip2(payload: &[u8]) -> Result<Vec<u8>> {
    let mut framed = Vec::with_capacity(BZIP2_MAGIC.len() + payload.len());
    framed.extend_from_slice(BZIP2_MAGIC);
    framed.extend_from_slice(payload);

    let mut decoder = BzDecoder::new(&framed[..]);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CacheError::Corrupt(format!("bzip2 decompression failed: {e}")))?;
    Ok(out)
}

fn compress_bzip2(data: &[u8]) -> Vec<u8> {
    // The legacy format always uses a single 100k block, giving a constant
    // "BZh1" magic that the on-disk payload omits and decode re-prepends.
    let mut encoder = BzEncoder::new(data, Bzip2Level::new(1));
    let mut framed = Vec::new();
    encoder.read_to_end(&mut framed).expect("in-memory bzip2 encode cannot fail");
    framed[BZIP2_MAGIC.len()..].to_vec()
}

fn decompress_gzip(payload: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(payload);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CacheError::Corrupt(format!("gzip decompression failed: {e}")))?;
    Ok(out)
}

fn compress_gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(data, GzipLevel::best());
    let mut out = Vec::new();
    encoder.read_to_end(&mut out).expect("in-memory gzip encode cannot fail");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_round_trips_any_payload() {
        let container = Container::new(Compression::None, vec![1, 2, 3, 4, 5], None);
        let bytes = container.encode();
        assert_eq!(Container::decode(&bytes).unwrap(), container);
    }

    #[test]
    fn gzip_round_trips_logical_payload() {
        let container = Container::new(Compression::Gzip, b"hello cache".to_vec(), None);
        let bytes = container.encode();
        let decoded = Container::decode(&bytes).unwrap();
        assert_eq!(decoded.data, container.data);
        assert_eq!(decoded.compression, Compression::Gzip);
    }

    #[test]
    fn bzip2_round_trips_logical_payload() {
        let container = Container::new(Compression::Bzip2, b"the quick brown fox".to_vec(), None);
        let bytes = container.encode();
        // The constant "BZh1" magic is stripped from the stored payload.
        assert_ne!(&bytes[9..9 + 4], b"BZh1");
        let decoded = Container::decode(&bytes).unwrap();
        assert_eq!(decoded.data, container.data);
    }

    #[test]
    fn versioned_gzip_scenario_from_spec() {
        let container = Container::new(Compression::Gzip, vec![0xDE, 0xAD, 0xBE, 0xEF], Some(42));
        let bytes = container.encode();
        assert_eq!(bytes[0], 0x02);
        assert_eq!(&bytes[5..9], &[0x00, 0x00, 0x00, 0x04]);
        let decoded = Container::decode(&bytes).unwrap();
        assert_eq!(decoded.version, Some(42));
        assert_eq!(decoded.data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn decode_rejects_unsupported_compression_byte() {
        let err = Container::decode(&[9, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, CacheError::UnsupportedCompression(9)));
    }

    #[test]
    fn decode_detects_length_mismatch() {
        let mut container = Container::new(Compression::Gzip, b"payload".to_vec(), None);
        let mut bytes = container.encode();
        // Corrupt the declared uncompressed length.
        bytes[5..9].copy_from_slice(&999u32.to_be_bytes());
        let err = Container::decode(&bytes).unwrap_err();
        assert!(matches!(err, CacheError::LengthMismatch { .. }));
        container.data.clear();
        let _ = container;
    }

    #[test]
    fn empty_payload_round_trips() {
        let container = Container::new(Compression::None, Vec::new(), None);
        let bytes = container.encode();
        assert_eq!(Container::decode(&bytes).unwrap(), container);
    }
}
