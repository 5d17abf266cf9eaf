//! The `Cache` façade.
//!
//! Composes `FileStore`, `Container`, `Archive`, and `ReferenceTable` into
//! the atomic read/write operations callers actually want: "give me this
//! file", "give me this archive member", "write this back and keep the
//! bookkeeping honest". Type 255 is reserved for low-level access through
//! `FileStore` directly; every method here rejects it.

use tracing::{debug, instrument};

use crate::checksum_table::{ChecksumTable, Entry as ChecksumEntry};
use crate::config::CacheConfig;
use crate::container::{Compression, Container};
use crate::crypto::whirlpool;
use crate::error::{CacheError, Result};
use crate::reference_table::{Entry, ReferenceTable, TableFlags};
use crate::store::FileStore;
use crate::{archive::Archive, META_TYPE};

/// High-level read/write engine over a cache directory.
#[derive(Debug)]
pub struct Cache {
    store: FileStore,
    config: CacheConfig,
}

impl Cache {
    /// Open the cache directory named in `config`.
    pub fn open(config: CacheConfig) -> Result<Self> {
        let store = FileStore::open(&config.directory)?;
        Ok(Self { store, config })
    }

    fn check_type(&self, type_: u8) -> Result<()> {
        if type_ == META_TYPE {
            return Err(CacheError::ReservedType);
        }
        if type_ as usize >= self.store.type_count() {
            return Err(CacheError::NoSuchType(type_));
        }
        Ok(())
    }

    /// Read and decode the container stored at `(type, file)`.
    #[instrument(skip(self))]
    pub fn read(&self, type_: u8, file: u32) -> Result<Container> {
        self.check_type(type_)?;
        let bytes = self.store.read(type_, file)?;
        Container::decode(&bytes)
    }

    fn read_meta_table(&self, type_: u8) -> Result<(ReferenceTable, Compression)> {
        let bytes = self.store.read(META_TYPE, type_ as u32)?;
        let container = Container::decode(&bytes)?;
        let table = ReferenceTable::decode(&container.data)?;
        Ok((table, container.compression))
    }

    /// Write `container` under `(type, file)`, bumping its version and
    /// updating the type's master reference table to match.
    #[instrument(skip(self, container))]
    pub fn write(&mut self, type_: u8, file: u32, mut container: Container) -> Result<()> {
        self.check_type(type_)?;

        container.version = Some(container.version.unwrap_or(0) + 1);

        let (mut table, table_compression) = self.read_meta_table(type_)?;

        let buf = container.encode();
        let body_len = buf.len().saturating_sub(2);
        let body = &buf[..body_len];

        let crc = crc32fast::hash(body) as i32;
        let whirl = if table.flags.contains(TableFlags::WHIRLPOOL) {
            whirlpool(body)
        } else {
            [0u8; 64]
        };

        let mut entry = table.get(file).cloned().unwrap_or_default();
        entry.crc = crc;
        entry.version = container.version.unwrap_or(0);
        if table.flags.contains(TableFlags::WHIRLPOOL) {
            entry.whirlpool = whirl;
        }
        table.put(file, entry);

        table.version = Some(table.version.unwrap_or(0) + 1);

        let table_container = Container::new(table_compression, table.encode(), table.version);
        self.store.write(META_TYPE, type_ as u32, &table_container.encode())?;
        self.store.write(type_, file, &buf)?;

        debug!(type_, file, version = ?container.version, "cache entry written");
        Ok(())
    }

    /// Read archive member `member` out of the archive stored at
    /// `(type, file)`.
    #[instrument(skip(self))]
    pub fn read_member(&self, type_: u8, file: u32, member: usize) -> Result<Vec<u8>> {
        self.check_type(type_)?;

        let container = self.read(type_, file)?;
        let (table, _) = self.read_meta_table(type_)?;
        let capacity = table
            .get(file)
            .map(Entry::capacity)
            .ok_or(CacheError::NotFound { type_, id: file })? as usize;

        let archive = Archive::decode(&container.data, capacity)?;
        Ok(archive.get(member)?.to_vec())
    }

    /// Write `bytes` as archive member `member` of `(type, file)`,
    /// synthesising the archive and its table entry if they don't exist.
    #[instrument(skip(self, bytes))]
    pub fn write_member(&mut self, type_: u8, file: u32, member: usize, bytes: Vec<u8>) -> Result<()> {
        self.check_type(type_)?;

        let (mut table, table_compression) = self.read_meta_table(type_)?;

        let (mut archive, compression, version) = match self.store.read(type_, file) {
            Ok(raw) if !raw.is_empty() => {
                let container = Container::decode(&raw)?;
                let entry = table.get(file);

                if self.config.strict_digests {
                    if let Some(entry) = entry {
                        let body_len = raw.len().saturating_sub(2);
                        let body = &raw[..body_len];
                        let crc = crc32fast::hash(body) as i32;
                        if crc != entry.crc {
                            return Err(CacheError::DigestMismatch);
                        }
                        if table.flags.contains(TableFlags::WHIRLPOOL) && whirlpool(body) != entry.whirlpool {
                            return Err(CacheError::DigestMismatch);
                        }
                    }
                }

                let capacity = entry.map(Entry::capacity).unwrap_or(0) as usize;
                let archive = Archive::decode(&container.data, capacity)?;
                (archive, container.compression, container.version.unwrap_or(0))
            }
            _ => {
                let mut archive = Archive::new(member + 1);
                for id in 0..member {
                    archive.put(id, vec![0u8]);
                }
                (archive, self.config.default_archive_compression, 0)
            }
        };

        if member >= archive.size() {
            for id in archive.size()..=member {
                if id != member {
                    archive.put(id, vec![0u8]);
                }
            }
        }
        archive.put(member, bytes);

        let new_version = version + 1;
        let data_container = Container::new(compression, archive.encode(), Some(new_version));
        let buf = data_container.encode();
        let body = &buf[..buf.len() - 2];
        let crc = crc32fast::hash(body) as i32;

        let mut entry = table.get(file).cloned().unwrap_or_default();
        entry.crc = crc;
        entry.version = new_version;
        if table.flags.contains(TableFlags::WHIRLPOOL) {
            entry.whirlpool = whirlpool(body);
        }
        for id in 0..archive.size() as u32 {
            entry.children.entry(id).or_default();
        }
        table.put(file, entry);
        table.version = Some(table.version.unwrap_or(0) + 1);

        let table_container = Container::new(table_compression, table.encode(), table.version);
        self.store.write(META_TYPE, type_ as u32, &table_container.encode())?;

        self.store.write(type_, file, &buf)?;

        Ok(())
    }

    /// Build the checksum table summarising every type's master reference
    /// table: `crc`/`whirlpool` of its raw meta bytes, and its own version.
    pub fn create_checksum_table(&self) -> Result<ChecksumTable> {
        let type_count = self.store.type_count();
        let mut table = ChecksumTable::new(type_count);

        for t in 0..type_count {
            let entry = match self.store.read(META_TYPE, t as u32) {
                Ok(raw) if !raw.is_empty() => {
                    let crc = crc32fast::hash(&raw) as i32;
                    let whirl = whirlpool(&raw);
                    let container = Container::decode(&raw)?;
                    let inner_table = ReferenceTable::decode(&container.data)?;
                    ChecksumEntry::new(crc, inner_table.version.unwrap_or(0), &whirl)?
                }
                _ => ChecksumEntry::new(0, 0, &[0u8; 64])?,
            };
            table.entries[t] = entry;
        }

        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::path::Path;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        File::create(path).unwrap();
    }

    fn open_cache_with_types(n: usize) -> (tempfile::TempDir, Cache) {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("main_file_cache.dat2"));
        for t in 0..n {
            touch(&dir.path().join(format!("main_file_cache.idx{t}")));
        }
        touch(&dir.path().join("main_file_cache.idx255"));

        let mut store = FileStore::open(dir.path()).unwrap();
        for t in 0..n {
            let table = ReferenceTable {
                flags: TableFlags::WHIRLPOOL,
                ..ReferenceTable::default()
            };
            let container = Container::new(Compression::None, table.encode(), table.version);
            store.write(META_TYPE, t as u32, &container.encode()).unwrap();
        }
        store.close();

        let config = CacheConfig::new(dir.path());
        let cache = Cache::open(config).unwrap();
        (dir, cache)
    }

    #[test]
    fn reserved_type_rejected() {
        let (_dir, cache) = open_cache_with_types(1);
        assert!(matches!(cache.read(META_TYPE, 0), Err(CacheError::ReservedType)));
    }

    #[test]
    fn end_to_end_write_scenario_from_spec() {
        let (_dir, mut cache) = open_cache_with_types(1);

        let container = Container::new(Compression::Gzip, vec![0u8; 100], Some(1));
        cache.write(0, 5, container).unwrap();

        let read_back = cache.read(0, 5).unwrap();
        assert_eq!(read_back.version, Some(2));
        assert_eq!(read_back.data, vec![0u8; 100]);

        let (table, _) = cache.read_meta_table(0).unwrap();
        let entry = table.get(5).unwrap();
        assert_eq!(entry.version, 2);

        let buf = Container::new(Compression::Gzip, vec![0u8; 100], Some(2)).encode();
        let body = &buf[..buf.len() - 2];
        assert_eq!(entry.crc, crc32fast::hash(body) as i32);
        assert_eq!(entry.whirlpool, whirlpool(body));
        assert_eq!(table.version, Some(1));
    }

    #[test]
    fn write_member_then_read_member() {
        let (_dir, mut cache) = open_cache_with_types(1);
        cache.write_member(0, 0, 0, vec![1, 2, 3]).unwrap();
        cache.write_member(0, 0, 1, vec![4, 5]).unwrap();

        assert_eq!(cache.read_member(0, 0, 0).unwrap(), vec![1, 2, 3]);
        assert_eq!(cache.read_member(0, 0, 1).unwrap(), vec![4, 5]);
    }

    #[test]
    fn create_checksum_table_covers_all_types() {
        let (_dir, cache) = open_cache_with_types(2);
        let checksum = cache.create_checksum_table().unwrap();
        assert_eq!(checksum.size(), 2);
    }
}
