//! Reference table codec.
//!
//! Every type's meta entry under `(255, type)` decodes, once decompressed,
//! to a `ReferenceTable`: per-entry CRC/version/whirlpool bookkeeping plus
//! a nested child-id map, used by the `Cache` façade to validate and
//! version writes.

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::error::{CacheError, Result};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TableFlags: u8 {
        const IDENTIFIERS = 1 << 0;
        const WHIRLPOOL = 1 << 1;
    }
}

/// A child file entry belonging to an `Entry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Child {
    pub identifier: i32,
}

impl Default for Child {
    fn default() -> Self {
        Self { identifier: -1 }
    }
}

/// One entry in a `ReferenceTable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub identifier: i32,
    pub crc: i32,
    pub whirlpool: [u8; 64],
    pub version: i32,
    pub children: BTreeMap<u32, Child>,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            identifier: -1,
            crc: 0,
            whirlpool: [0u8; 64],
            version: 0,
            children: BTreeMap::new(),
        }
    }
}

impl Entry {
    /// `maxChildId + 1`, or 0 when there are no children.
    pub fn capacity(&self) -> u32 {
        self.children.keys().next_back().map_or(0, |&id| id + 1)
    }

    /// Number of present children.
    pub fn size(&self) -> usize {
        self.children.len()
    }

    pub fn get_child(&self, child_id: u32) -> Option<&Child> {
        self.children.get(&child_id)
    }

    pub fn put_child(&mut self, child_id: u32, child: Child) {
        self.children.insert(child_id, child);
    }

    pub fn remove_child(&mut self, child_id: u32) -> Option<Child> {
        self.children.remove(&child_id)
    }
}

/// A decoded reference table: the meta entry for one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTable {
    pub format: u8,
    pub version: Option<i32>,
    pub flags: TableFlags,
    pub entries: BTreeMap<u32, Entry>,
}

impl Default for ReferenceTable {
    fn default() -> Self {
        Self {
            format: 6,
            version: Some(0),
            flags: TableFlags::empty(),
            entries: BTreeMap::new(),
        }
    }
}

impl ReferenceTable {
    /// `maxEntryId + 1`, or 0 when the table is empty.
    pub fn capacity(&self) -> u32 {
        self.entries.keys().next_back().map_or(0, |&id| id + 1)
    }

    /// Number of present entries.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: u32) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub fn put(&mut self, id: u32, entry: Entry) {
        self.entries.insert(id, entry);
    }

    pub fn remove(&mut self, id: u32) -> Option<Entry> {
        self.entries.remove(&id)
    }

    pub fn get_child(&self, parent_id: u32, child_id: u32) -> Option<&Child> {
        self.entries.get(&parent_id).and_then(|e| e.get_child(child_id))
    }

    pub fn put_child(&mut self, parent_id: u32, child_id: u32, child: Child) {
        self.entries.entry(parent_id).or_default().put_child(child_id, child);
    }

    pub fn remove_child(&mut self, parent_id: u32, child_id: u32) -> Option<Child> {
        self.entries.get_mut(&parent_id).and_then(|e| e.remove_child(child_id))
    }

    /// Decode a reference table from its decompressed bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);

        let format = r.u8()?;
        let version = if format >= 6 { Some(r.i32()?) } else { None };
        let flags = TableFlags::from_bits_truncate(r.u8()?);

        let entry_count = r.u16()? as usize;
        let mut entry_ids = Vec::with_capacity(entry_count);
        let mut prev = 0i64;
        for _ in 0..entry_count {
            prev += r.u16()? as i64;
            entry_ids.push(prev as u32);
        }

        let mut identifiers = vec![-1i32; entry_count];
        if flags.contains(TableFlags::IDENTIFIERS) {
            for identifier in identifiers.iter_mut() {
                *identifier = r.i32()?;
            }
        }

        let mut crcs = vec![0i32; entry_count];
        for crc in crcs.iter_mut() {
            *crc = r.i32()?;
        }

        let mut whirlpools = vec![[0u8; 64]; entry_count];
        if flags.contains(TableFlags::WHIRLPOOL) {
            for whirlpool in whirlpools.iter_mut() {
                *whirlpool = r.bytes64()?;
            }
        }

        let mut versions = vec![0i32; entry_count];
        for version in versions.iter_mut() {
            *version = r.i32()?;
        }

        let mut child_counts = vec![0usize; entry_count];
        for count in child_counts.iter_mut() {
            *count = r.u16()? as usize;
        }

        let mut child_ids: Vec<Vec<u32>> = Vec::with_capacity(entry_count);
        for &count in &child_counts {
            let mut ids = Vec::with_capacity(count);
            let mut prev = 0i64;
            for _ in 0..count {
                prev += r.u16()? as i64;
                ids.push(prev as u32);
            }
            child_ids.push(ids);
        }

        let mut child_identifiers: Vec<Vec<i32>> = child_counts.iter().map(|&c| vec![-1i32; c]).collect();
        if flags.contains(TableFlags::IDENTIFIERS) {
            for identifiers in child_identifiers.iter_mut() {
                for identifier in identifiers.iter_mut() {
                    *identifier = r.i32()?;
                }
            }
        }

        let mut entries = BTreeMap::new();
        for i in 0..entry_count {
            let mut children = BTreeMap::new();
            for (j, &child_id) in child_ids[i].iter().enumerate() {
                children.insert(child_id, Child { identifier: child_identifiers[i][j] });
            }

            entries.insert(
                entry_ids[i],
                Entry {
                    identifier: identifiers[i],
                    crc: crcs[i],
                    whirlpool: whirlpools[i],
                    version: versions[i],
                    children,
                },
            );
        }

        Ok(Self { format, version, flags, entries })
    }

    /// Encode this table, preserving ascending id order.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.format);
        if self.format >= 6 {
            out.extend_from_slice(&self.version.unwrap_or(0).to_be_bytes());
        }
        out.push(self.flags.bits());

        out.extend_from_slice(&(self.entries.len() as u16).to_be_bytes());
        let mut prev = 0i64;
        for &id in self.entries.keys() {
            let delta = id as i64 - prev;
            out.extend_from_slice(&(delta as u16).to_be_bytes());
            prev = id as i64;
        }

        if self.flags.contains(TableFlags::IDENTIFIERS) {
            for entry in self.entries.values() {
                out.extend_from_slice(&entry.identifier.to_be_bytes());
            }
        }

        for entry in self.entries.values() {
            out.extend_from_slice(&entry.crc.to_be_bytes());
        }

        if self.flags.contains(TableFlags::WHIRLPOOL) {
            for entry in self.entries.values() {
                out.extend_from_slice(&entry.whirlpool);
            }
        }

        for entry in self.entries.values() {
            out.extend_from_slice(&entry.version.to_be_bytes());
        }

        for entry in self.entries.values() {
            out.extend_from_slice(&(entry.children.len() as u16).to_be_bytes());
        }

        for entry in self.entries.values() {
            let mut prev = 0i64;
            for &child_id in entry.children.keys() {
                let delta = child_id as i64 - prev;
                out.extend_from_slice(&(delta as u16).to_be_bytes());
                prev = child_id as i64;
            }
        }

        if self.flags.contains(TableFlags::IDENTIFIERS) {
            for entry in self.entries.values() {
                for child in entry.children.values() {
                    out.extend_from_slice(&child.identifier.to_be_bytes());
                }
            }
        }

        out
    }
}

/// A cursor over a big-endian byte buffer, bounds-checked against `Corrupt`.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| CacheError::Corrupt("reference table buffer truncated".into()))?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn bytes64(&mut self) -> Result<[u8; 64]> {
        let b = self.take(64)?;
        let mut out = [0u8; 64];
        out.copy_from_slice(b);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> ReferenceTable {
        let mut table = ReferenceTable {
            format: 6,
            version: Some(5),
            flags: TableFlags::IDENTIFIERS | TableFlags::WHIRLPOOL,
            entries: BTreeMap::new(),
        };

        let mut entry0 = Entry { identifier: 100, crc: 111, version: 1, ..Entry::default() };
        entry0.whirlpool[0] = 0xAB;
        entry0.put_child(0, Child { identifier: 1 });
        entry0.put_child(2, Child { identifier: 2 });

        let entry5 = Entry { identifier: 200, crc: 222, version: 2, ..Entry::default() };

        table.put(0, entry0);
        table.put(5, entry5);
        table
    }

    #[test]
    fn round_trip_encode_decode() {
        let table = sample_table();
        let bytes = table.encode();
        let decoded = ReferenceTable::decode(&bytes).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn round_trip_preserves_byte_layout() {
        let table = sample_table();
        let bytes = table.encode();
        let decoded = ReferenceTable::decode(&bytes).unwrap();
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn empty_table_round_trips() {
        let table = ReferenceTable { entries: BTreeMap::new(), ..ReferenceTable::default() };
        let bytes = table.encode();
        let decoded = ReferenceTable::decode(&bytes).unwrap();
        assert_eq!(decoded.capacity(), 0);
        assert_eq!(decoded.size(), 0);
    }

    #[test]
    fn capacity_and_size_reflect_max_id() {
        let table = sample_table();
        assert_eq!(table.capacity(), 6);
        assert_eq!(table.size(), 2);
        assert_eq!(table.get(0).unwrap().capacity(), 3);
        assert_eq!(table.get(0).unwrap().size(), 2);
    }

    #[test]
    fn format_below_6_omits_version() {
        let mut table = sample_table();
        table.format = 5;
        table.version = None;
        let bytes = table.encode();
        let decoded = ReferenceTable::decode(&bytes).unwrap();
        assert_eq!(decoded.version, None);
    }

    #[test]
    fn decode_rejects_truncated_buffer() {
        let err = ReferenceTable::decode(&[6, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, CacheError::Corrupt(_)));
    }
}
