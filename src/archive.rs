//! Archive codec.
//!
//! An archive bundles several member files into one container payload,
//! chunked and delta-encoded so that member boundaries can be recovered
//! without a separate length table on disk.

use crate::error::{CacheError, Result};

/// A decoded archive: `N` member entries addressable by id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Archive {
    entries: Vec<Vec<u8>>,
}

impl Archive {
    /// Create an archive with `n` empty members.
    pub fn new(n: usize) -> Self {
        Self { entries: vec![Vec::new(); n] }
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Read member `id`.
    pub fn get(&self, id: usize) -> Result<&[u8]> {
        self.entries
            .get(id)
            .map(Vec::as_slice)
            .ok_or(CacheError::Corrupt(format!("archive member {id} out of range")))
    }

    /// Replace member `id`, growing the archive if needed.
    pub fn put(&mut self, id: usize, bytes: Vec<u8>) {
        if id >= self.entries.len() {
            self.entries.resize(id + 1, Vec::new());
        }
        self.entries[id] = bytes;
    }

    /// Decode an archive of `n` members from its chunked, delta-encoded
    /// wire format. Any chunk count `C >= 1` is accepted.
    pub fn decode(bytes: &[u8], n: usize) -> Result<Self> {
        if n == 0 {
            return Ok(Self { entries: Vec::new() });
        }
        if bytes.is_empty() {
            return Err(CacheError::Corrupt("empty archive buffer".into()));
        }

        let chunks = *bytes.last().unwrap() as usize;
        let table_len = chunks
            .checked_mul(n)
            .and_then(|v| v.checked_mul(4))
            .ok_or_else(|| CacheError::Corrupt("archive chunk table overflow".into()))?;

        if bytes.len() < 1 + table_len {
            return Err(CacheError::Corrupt("archive buffer too short for chunk table".into()));
        }

        let mut read_ptr = bytes.len() - 1 - table_len;
        let table_start = read_ptr;

        // sizes[chunk][id]
        let mut sizes = vec![vec![0usize; n]; chunks];
        for chunk in sizes.iter_mut() {
            let mut running = 0i64;
            for size in chunk.iter_mut() {
                let delta = i32::from_be_bytes([
                    bytes[read_ptr],
                    bytes[read_ptr + 1],
                    bytes[read_ptr + 2],
                    bytes[read_ptr + 3],
                ]);
                read_ptr += 4;
                running += delta as i64;
                if running < 0 {
                    return Err(CacheError::Corrupt("archive chunk size went negative".into()));
                }
                *size = running as usize;
            }
        }

        let mut entries: Vec<Vec<u8>> = vec![Vec::new(); n];
        let mut ptr = 0usize;
        for chunk in &sizes {
            for (id, &size) in chunk.iter().enumerate() {
                let end = ptr + size;
                let slice = bytes.get(ptr..end).ok_or_else(|| {
                    CacheError::Corrupt("archive payload shorter than chunk table implies".into())
                })?;
                entries[id].extend_from_slice(slice);
                ptr = end;
            }
        }

        if ptr != table_start {
            return Err(CacheError::Corrupt(
                "archive payload length does not match chunk table".into(),
            ));
        }

        Ok(Self { entries })
    }

    /// Encode this archive. Always emits a single chunk (`C = 1`); decoding
    /// handles `C > 1` but the encoder never needs to produce it.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            out.extend_from_slice(entry);
        }

        let mut prev = 0i64;
        for entry in &self.entries {
            let delta = entry.len() as i64 - prev;
            out.extend_from_slice(&(delta as i32).to_be_bytes());
            prev = entry.len() as i64;
        }

        out.push(1);
        out
    }
}
