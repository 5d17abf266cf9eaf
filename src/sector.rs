//! Fixed-size sector frame codec.
//!
//! Every sector on disk is 520 bytes: an 8-byte header followed by a
//! 512-byte payload. Tail sectors are zero-padded to the full payload size.

use crate::error::{CacheError, Result};
use crate::{SECTOR_DATA_SIZE, SECTOR_HEADER_SIZE, SECTOR_SIZE};

/// One decoded sector frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sector {
    /// Entry id this sector belongs to.
    pub id: u16,
    /// 0-based position of this sector within its chain.
    pub chunk: u16,
    /// Offset (in sectors) of the next sector in the chain, or 0 at EOF.
    pub next_sector: u32,
    /// Type this sector belongs to.
    pub type_: u8,
    /// Exactly 512 bytes of payload (tail sectors are zero-padded).
    pub payload: [u8; SECTOR_DATA_SIZE],
}

impl Sector {
    /// Decode a 520-byte frame into a `Sector`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SECTOR_SIZE {
            return Err(CacheError::MalformedSector {
                length: bytes.len(),
                expected: SECTOR_SIZE,
            });
        }

        let id = u16::from_be_bytes([bytes[0], bytes[1]]);
        let chunk = u16::from_be_bytes([bytes[2], bytes[3]]);
        let next_sector = u32::from_be_bytes([0, bytes[4], bytes[5], bytes[6]]);
        let type_ = bytes[7];

        let mut payload = [0u8; SECTOR_DATA_SIZE];
        payload.copy_from_slice(&bytes[SECTOR_HEADER_SIZE..SECTOR_SIZE]);

        Ok(Self {
            id,
            chunk,
            next_sector,
            type_,
            payload,
        })
    }

    /// Encode this sector into its 520-byte on-disk frame.
    pub fn encode(&self) -> [u8; SECTOR_SIZE] {
        let mut out = [0u8; SECTOR_SIZE];
        out[0..2].copy_from_slice(&self.id.to_be_bytes());
        out[2..4].copy_from_slice(&self.chunk.to_be_bytes());
        let next = self.next_sector.to_be_bytes();
        out[4..7].copy_from_slice(&next[1..4]);
        out[7] = self.type_;
        out[SECTOR_HEADER_SIZE..SECTOR_SIZE].copy_from_slice(&self.payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Sector {
        let mut payload = [0u8; SECTOR_DATA_SIZE];
        payload[0] = 0xAA;
        payload[1] = 0xBB;
        Sector {
            id: 7,
            chunk: 1,
            next_sector: 42,
            type_: 3,
            payload,
        }
    }

    #[test]
    fn round_trip_encode_decode() {
        let sector = sample();
        let bytes = sector.encode();
        assert_eq!(bytes.len(), SECTOR_SIZE);
        let decoded = Sector::decode(&bytes).unwrap();
        assert_eq!(decoded, sector);
    }

    #[test]
    fn round_trip_decode_encode() {
        let sector = sample();
        let bytes = sector.encode();
        let decoded = Sector::decode(&bytes).unwrap();
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = Sector::decode(&[0u8; 100]).unwrap_err();
        assert!(matches!(
            err,
            CacheError::MalformedSector { length: 100, expected: SECTOR_SIZE }
        ));
    }

    #[test]
    fn eof_sentinel_is_zero() {
        let mut sector = sample();
        sector.next_sector = 0;
        let bytes = sector.encode();
        assert_eq!(&bytes[4..7], &[0, 0, 0]);
    }

    #[test]
    fn next_sector_is_24_bit() {
        let mut sector = sample();
        sector.next_sector = 0x00FF_FFFF;
        let bytes = sector.encode();
        let decoded = Sector::decode(&bytes).unwrap();
        assert_eq!(decoded.next_sector, 0x00FF_FFFF);
    }
}
