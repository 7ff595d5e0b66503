//! Resource table (`resources.arsc`) at chunk granularity.
//!
//! Packages are split into their header, type-name pool, key pool and the
//! remaining children, which stay opaque. Type chunks are only read, to learn
//! which global pool strings name files and under which resource type.

use std::collections::BTreeMap;

use crate::chunk::{
    begin_chunk, finish_chunk, put_u32, read_u16_at, read_u32_at, ChunkHeader, RawChunk, Reader,
    StringPool, RES_STRING_POOL_TYPE, RES_TABLE_PACKAGE_TYPE, RES_TABLE_TYPE, RES_TABLE_TYPE_TYPE,
};
use crate::error::{Error, Result};

const TABLE_HEADER_SIZE: u16 = 12;
const PACKAGE_NAME_UNITS: usize = 128;
/// Header bytes up to and including `lastPublicKey`.
const PACKAGE_BASE_HEADER: usize = 8 + 4 + PACKAGE_NAME_UNITS * 2 + 16;

const TYPE_FLAG_SPARSE: u8 = 0x01;
const TYPE_FLAG_OFFSET16: u8 = 0x02;
const ENTRY_FLAG_COMPLEX: u16 = 0x0001;
const ENTRY_FLAG_COMPACT: u16 = 0x0008;
const NO_OFFSET16: u16 = 0xFFFF;
const NO_OFFSET32: u32 = 0xFFFF_FFFF;
const TYPE_STRING: u8 = 0x03;

#[derive(Debug, Clone)]
pub struct Package {
    pub id: u32,
    pub name: String,
    pub last_public_type: u32,
    pub last_public_key: u32,
    /// Header fields past `lastPublicKey` (`typeIdOffset` on current tools).
    pub header_tail: Vec<u8>,
    pub type_strings: StringPool,
    pub key_strings: StringPool,
    pub chunks: Vec<RawChunk>,
}

impl Package {
    fn parse(data: &[u8], header: &ChunkHeader) -> Result<Self> {
        const WHAT: &str = "resource package";
        if (header.header_size as usize) < PACKAGE_BASE_HEADER {
            return Err(Error::malformed(WHAT, header.start, "package header too small"));
        }
        let mut reader = Reader::at(data, header.start + 8, WHAT);
        let id = reader.u32()?;
        let mut units = Vec::with_capacity(PACKAGE_NAME_UNITS);
        for _ in 0..PACKAGE_NAME_UNITS {
            units.push(reader.u16()?);
        }
        let name_len = units.iter().position(|u| *u == 0).unwrap_or(units.len());
        let name = String::from_utf16_lossy(&units[..name_len]);
        let type_strings_at = reader.u32()? as usize;
        let last_public_type = reader.u32()?;
        let key_strings_at = reader.u32()? as usize;
        let last_public_key = reader.u32()?;
        let header_tail =
            data[header.start + PACKAGE_BASE_HEADER..header.body_start()].to_vec();

        let mut type_strings = None;
        let mut key_strings = None;
        let mut chunks = Vec::new();
        let mut offset = header.body_start();
        while offset + 8 <= header.end() {
            let child = ChunkHeader::read(data, offset, WHAT)?;
            let relative = offset - header.start;
            if child.chunk_type == RES_STRING_POOL_TYPE && relative == type_strings_at {
                type_strings = Some(StringPool::parse(data, &child)?);
            } else if child.chunk_type == RES_STRING_POOL_TYPE && relative == key_strings_at {
                key_strings = Some(StringPool::parse(data, &child)?);
            } else {
                chunks.push(RawChunk::from_header(data, &child));
            }
            offset = child.end();
        }

        Ok(Self {
            id,
            name,
            last_public_type,
            last_public_key,
            header_tail,
            type_strings: type_strings
                .ok_or_else(|| Error::malformed(WHAT, header.start, "missing type string pool"))?,
            key_strings: key_strings
                .ok_or_else(|| Error::malformed(WHAT, header.start, "missing key string pool"))?,
            chunks,
        })
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        let header_size = PACKAGE_BASE_HEADER + self.header_tail.len();
        let start = begin_chunk(buf, RES_TABLE_PACKAGE_TYPE, header_size as u16);
        put_u32(buf, self.id);
        let mut units: Vec<u16> = self.name.encode_utf16().take(PACKAGE_NAME_UNITS - 1).collect();
        units.resize(PACKAGE_NAME_UNITS, 0);
        for unit in units {
            buf.extend_from_slice(&unit.to_le_bytes());
        }
        let type_strings = self.type_strings.to_bytes();
        put_u32(buf, header_size as u32);
        put_u32(buf, self.last_public_type);
        put_u32(buf, (header_size + type_strings.len()) as u32);
        put_u32(buf, self.last_public_key);
        buf.extend_from_slice(&self.header_tail);
        buf.extend_from_slice(&type_strings);
        self.key_strings.write_to(buf);
        for chunk in &self.chunks {
            chunk.write_to(buf);
        }
        finish_chunk(buf, start);
    }

    fn type_id_offset(&self) -> u32 {
        read_u32_at(&self.header_tail, 0).unwrap_or(0)
    }

    /// Name of the resource type with the given 1-based id.
    pub fn type_name(&self, type_id: u8) -> Option<&str> {
        let index = (type_id as u32).checked_sub(1 + self.type_id_offset())?;
        self.type_strings.get(index)
    }

    /// Global pool indices of string values, with the type that declares them.
    fn string_values(&self, out: &mut BTreeMap<u32, String>) {
        for chunk in self.chunks.iter().filter(|c| c.chunk_type == RES_TABLE_TYPE_TYPE) {
            let Some(type_name) = chunk.header.first().and_then(|id| self.type_name(*id)) else {
                continue;
            };
            for index in type_string_values(chunk) {
                out.entry(index).or_insert_with(|| type_name.to_string());
            }
        }
    }
}

/// Walks the entries of a `ResTable_type` chunk and yields every plain
/// string value. Entries that cannot be decoded are skipped.
fn type_string_values(chunk: &RawChunk) -> Vec<u32> {
    let header = &chunk.header;
    let body = &chunk.body;
    let (Some(&flags), Some(entry_count), Some(entries_start)) = (
        header.get(1),
        read_u32_at(header, 4),
        read_u32_at(header, 8),
    ) else {
        return Vec::new();
    };
    let Some(entries_base) = (entries_start as usize).checked_sub(8 + header.len()) else {
        return Vec::new();
    };

    let mut offsets = Vec::new();
    for i in 0..entry_count as usize {
        let offset = if flags & TYPE_FLAG_SPARSE != 0 {
            read_u16_at(body, i * 4 + 2).map(|o| o as usize * 4)
        } else if flags & TYPE_FLAG_OFFSET16 != 0 {
            match read_u16_at(body, i * 2) {
                Some(NO_OFFSET16) | None => None,
                Some(o) => Some(o as usize * 4),
            }
        } else {
            match read_u32_at(body, i * 4) {
                Some(NO_OFFSET32) | None => None,
                Some(o) => Some(o as usize),
            }
        };
        offsets.extend(offset);
    }

    let mut values = Vec::new();
    for offset in offsets {
        let at = entries_base + offset;
        let (Some(size), Some(entry_flags)) = (read_u16_at(body, at), read_u16_at(body, at + 2)) else {
            continue;
        };
        let value = if entry_flags & ENTRY_FLAG_COMPACT != 0 {
            read_u32_at(body, at + 4).map(|data| ((entry_flags >> 8) as u8, data))
        } else if entry_flags & ENTRY_FLAG_COMPLEX != 0 {
            None
        } else {
            let value_at = at + size as usize;
            body.get(value_at + 3)
                .copied()
                .zip(read_u32_at(body, value_at + 4))
        };
        if let Some((TYPE_STRING, index)) = value {
            values.push(index);
        }
    }
    values
}

#[derive(Debug, Clone)]
pub enum TableChunk {
    StringPool(StringPool),
    Package(Package),
    Unknown(RawChunk),
}

#[derive(Debug, Clone)]
pub struct ResourceTable {
    pub chunks: Vec<TableChunk>,
}

impl ResourceTable {
    pub fn parse(data: &[u8]) -> Result<Self> {
        const WHAT: &str = "resource table";
        let root = ChunkHeader::read(data, 0, WHAT)?;
        if root.chunk_type != RES_TABLE_TYPE {
            return Err(Error::malformed(
                WHAT,
                0,
                format!("unexpected table type {:#06x}", root.chunk_type),
            ));
        }

        let mut chunks = Vec::new();
        let mut offset = root.body_start();
        while offset + 8 <= root.end() {
            let header = ChunkHeader::read(data, offset, WHAT)?;
            chunks.push(match header.chunk_type {
                RES_STRING_POOL_TYPE => TableChunk::StringPool(StringPool::parse(data, &header)?),
                RES_TABLE_PACKAGE_TYPE => TableChunk::Package(Package::parse(data, &header)?),
                _ => TableChunk::Unknown(RawChunk::from_header(data, &header)),
            });
            offset = header.end();
        }
        Ok(Self { chunks })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let start = begin_chunk(&mut buf, RES_TABLE_TYPE, TABLE_HEADER_SIZE);
        put_u32(&mut buf, self.packages().count() as u32);
        for chunk in &self.chunks {
            match chunk {
                TableChunk::StringPool(pool) => pool.write_to(&mut buf),
                TableChunk::Package(package) => package.write_to(&mut buf),
                TableChunk::Unknown(raw) => raw.write_to(&mut buf),
            }
        }
        finish_chunk(&mut buf, start);
        buf
    }

    pub fn global_pool(&self) -> Option<&StringPool> {
        self.chunks.iter().find_map(|c| match c {
            TableChunk::StringPool(pool) => Some(pool),
            _ => None,
        })
    }

    pub fn global_pool_mut(&mut self) -> Option<&mut StringPool> {
        self.chunks.iter_mut().find_map(|c| match c {
            TableChunk::StringPool(pool) => Some(pool),
            _ => None,
        })
    }

    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.chunks.iter().filter_map(|c| match c {
            TableChunk::Package(p) => Some(p),
            _ => None,
        })
    }

    pub fn packages_mut(&mut self) -> impl Iterator<Item = &mut Package> {
        self.chunks.iter_mut().filter_map(|c| match c {
            TableChunk::Package(p) => Some(p),
            _ => None,
        })
    }

    /// First position reserved for decoy chunks: right after the global pool.
    pub fn placeholder_slot(&self) -> usize {
        self.chunks
            .iter()
            .position(|c| matches!(c, TableChunk::StringPool(_)))
            .map_or(0, |i| i + 1)
    }

    pub fn insert_decoy(&mut self, chunk: RawChunk) {
        let slot = self.placeholder_slot();
        self.chunks.insert(slot, TableChunk::Unknown(chunk));
    }

    pub fn unknown_chunks(&self) -> impl Iterator<Item = &RawChunk> {
        self.chunks.iter().filter_map(|c| match c {
            TableChunk::Unknown(raw) => Some(raw),
            _ => None,
        })
    }

    /// Maps global pool indices holding plain string values to the name of
    /// the first resource type that references them.
    pub fn string_value_types(&self) -> BTreeMap<u32, String> {
        let mut out = BTreeMap::new();
        for package in self.packages() {
            package.string_values(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn parses_fixture_table() {
        let bytes = testutil::table_bytes(&testutil::FIXTURE_FILES);
        let table = ResourceTable::parse(&bytes).unwrap();
        let package = table.packages().next().unwrap();
        assert_eq!(package.id, 0x7f);
        assert_eq!(package.name, "com.example.app");
        assert_eq!(package.type_name(1), Some("drawable"));
        assert_eq!(table.to_bytes(), bytes);
    }

    #[test]
    fn finds_file_paths_with_their_types() {
        let table = ResourceTable::parse(&testutil::table_bytes(&testutil::FIXTURE_FILES)).unwrap();
        let pool = table.global_pool().unwrap();
        let found: Vec<_> = table
            .string_value_types()
            .into_iter()
            .map(|(index, ty)| (pool.get(index).unwrap().to_string(), ty))
            .collect();
        assert_eq!(
            found,
            [
                ("res/drawable/icon.png".to_string(), "drawable".to_string()),
                ("res/layout/main.xml".to_string(), "layout".to_string()),
                ("res/font/custom.ttf".to_string(), "font".to_string()),
            ]
        );
    }

    #[test]
    fn reads_sparse_and_offset16_type_chunks() {
        let dense = testutil::type_chunk(1, &[(0, 4)]);
        assert_eq!(type_string_values(&dense), [4]);

        let mut sparse = dense.clone();
        sparse.header[1] = TYPE_FLAG_SPARSE;
        sparse.body[..4].copy_from_slice(&[0, 0, 0, 0]);
        assert_eq!(type_string_values(&sparse), [4]);

        let mut offset16 = dense;
        offset16.header[1] = TYPE_FLAG_OFFSET16;
        offset16.body[..2].copy_from_slice(&[0, 0]);
        assert_eq!(type_string_values(&offset16), [4]);
    }

    #[test]
    fn decoy_lands_after_global_pool() {
        let mut table = ResourceTable::parse(&testutil::table_bytes(&testutil::FIXTURE_FILES)).unwrap();
        table.insert_decoy(RawChunk {
            chunk_type: 0,
            header: vec![1, 2, 3, 4],
            body: vec![5, 6, 7, 8],
        });
        let reparsed = ResourceTable::parse(&table.to_bytes()).unwrap();
        assert!(matches!(reparsed.chunks[0], TableChunk::StringPool(_)));
        assert!(matches!(&reparsed.chunks[1], TableChunk::Unknown(raw) if raw.body == [5, 6, 7, 8]));
        assert_eq!(reparsed.packages().count(), 1);
    }
}
