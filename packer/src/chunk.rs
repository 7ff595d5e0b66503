//! Shared building blocks of the resource chunk formats: a little-endian
//! cursor, the generic chunk header, opaque chunks and the string pool.

use crate::error::{Error, Result};

pub const RES_NULL_TYPE: u16 = 0x0000;
pub const RES_STRING_POOL_TYPE: u16 = 0x0001;
pub const RES_TABLE_TYPE: u16 = 0x0002;
pub const RES_XML_TYPE: u16 = 0x0003;

pub const RES_XML_START_NAMESPACE_TYPE: u16 = 0x0100;
pub const RES_XML_END_NAMESPACE_TYPE: u16 = 0x0101;
pub const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;
pub const RES_XML_END_ELEMENT_TYPE: u16 = 0x0103;
pub const RES_XML_CDATA_TYPE: u16 = 0x0104;
pub const RES_XML_RESOURCE_MAP_TYPE: u16 = 0x0180;

pub const RES_TABLE_PACKAGE_TYPE: u16 = 0x0200;
pub const RES_TABLE_TYPE_TYPE: u16 = 0x0201;

pub const NO_ENTRY: u32 = 0xFFFF_FFFF;

const CHUNK_HEADER_SIZE: usize = 8;
const STRING_POOL_HEADER_SIZE: usize = 28;
const SORTED_FLAG: u32 = 1 << 0;
const UTF8_FLAG: u32 = 1 << 8;

pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], what: &'static str) -> Self {
        Self { data, pos: 0, what }
    }

    pub fn at(data: &'a [u8], pos: usize, what: &'static str) -> Self {
        Self { data, pos, what }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| Error::malformed(self.what, self.pos, "unexpected end of data"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

pub fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn align4(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

pub fn read_u32_at(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn read_u16_at(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

/// Writes a chunk header with placeholder sizes and returns its start offset.
pub fn begin_chunk(buf: &mut Vec<u8>, chunk_type: u16, header_size: u16) -> usize {
    let start = buf.len();
    put_u16(buf, chunk_type);
    put_u16(buf, header_size);
    put_u32(buf, 0);
    start
}

/// Patches the total size of the chunk started at `start`.
pub fn finish_chunk(buf: &mut [u8], start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start + 4..start + 8].copy_from_slice(&size.to_le_bytes());
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkHeader {
    pub chunk_type: u16,
    pub header_size: u16,
    pub size: u32,
    pub start: usize,
}

impl ChunkHeader {
    pub fn read(data: &[u8], start: usize, what: &'static str) -> Result<Self> {
        let mut reader = Reader::at(data, start, what);
        let chunk_type = reader.u16()?;
        let header_size = reader.u16()?;
        let size = reader.u32()?;
        if (header_size as usize) < CHUNK_HEADER_SIZE || header_size as u32 > size {
            return Err(Error::malformed(what, start, "bad chunk header size"));
        }
        if start + size as usize > data.len() {
            return Err(Error::malformed(what, start, "chunk runs past end of data"));
        }
        Ok(Self {
            chunk_type,
            header_size,
            size,
            start,
        })
    }

    pub fn end(&self) -> usize {
        self.start + self.size as usize
    }

    pub fn body_start(&self) -> usize {
        self.start + self.header_size as usize
    }
}

/// A chunk carried through unchanged, or built by hand with any type label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    pub chunk_type: u16,
    /// Header bytes following the 8-byte base header.
    pub header: Vec<u8>,
    pub body: Vec<u8>,
}

impl RawChunk {
    pub fn from_header(data: &[u8], header: &ChunkHeader) -> Self {
        Self {
            chunk_type: header.chunk_type,
            header: data[header.start + CHUNK_HEADER_SIZE..header.body_start()].to_vec(),
            body: data[header.body_start()..header.end()].to_vec(),
        }
    }

    /// Reinterprets a serialized chunk, keeping everything but the type label.
    pub fn relabel(bytes: &[u8], chunk_type: u16) -> Result<Self> {
        let header = ChunkHeader::read(bytes, 0, "chunk")?;
        let mut chunk = Self::from_header(bytes, &header);
        chunk.chunk_type = chunk_type;
        Ok(chunk)
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        let header_size = (CHUNK_HEADER_SIZE + self.header.len()) as u16;
        let start = begin_chunk(buf, self.chunk_type, header_size);
        buf.extend_from_slice(&self.header);
        buf.extend_from_slice(&self.body);
        finish_chunk(buf, start);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CHUNK_HEADER_SIZE + self.header.len() + self.body.len());
        self.write_to(&mut buf);
        buf
    }
}

#[derive(Debug, Clone)]
struct PoolString {
    value: String,
    /// Bytes as found in the input, reused verbatim while `value` is untouched.
    encoded: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct StringPool {
    flags: u32,
    strings: Vec<PoolString>,
    style_offsets: Vec<u32>,
    style_data: Vec<u8>,
}

impl StringPool {
    pub fn new(utf8: bool) -> Self {
        Self {
            flags: if utf8 { UTF8_FLAG } else { 0 },
            strings: Vec::new(),
            style_offsets: Vec::new(),
            style_data: Vec::new(),
        }
    }

    pub fn from_strings<I, S>(utf8: bool, strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pool = Self::new(utf8);
        for s in strings {
            pool.push(s);
        }
        pool
    }

    pub fn is_utf8(&self) -> bool {
        self.flags & UTF8_FLAG != 0
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(|s| s.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.strings.iter().map(|s| s.value.as_str())
    }

    pub fn position(&self, value: &str) -> Option<u32> {
        self.strings
            .iter()
            .position(|s| s.value == value)
            .map(|i| i as u32)
    }

    /// Appends a string and returns its index.
    pub fn push(&mut self, value: impl Into<String>) -> u32 {
        self.flags &= !SORTED_FLAG;
        self.strings.push(PoolString {
            value: value.into(),
            encoded: None,
        });
        (self.strings.len() - 1) as u32
    }

    pub fn set(&mut self, index: u32, value: impl Into<String>) -> bool {
        match self.strings.get_mut(index as usize) {
            Some(slot) => {
                slot.value = value.into();
                slot.encoded = None;
                self.flags &= !SORTED_FLAG;
                true
            }
            None => false,
        }
    }

    pub fn parse(data: &[u8], header: &ChunkHeader) -> Result<Self> {
        const WHAT: &str = "string pool";
        if (header.header_size as usize) < STRING_POOL_HEADER_SIZE {
            return Err(Error::malformed(WHAT, header.start, "header too small"));
        }
        let chunk = &data[header.start..header.end()];
        let mut reader = Reader::at(chunk, CHUNK_HEADER_SIZE, WHAT);
        let string_count = reader.u32()? as usize;
        let style_count = reader.u32()? as usize;
        let flags = reader.u32()?;
        let strings_start = reader.u32()? as usize;
        let styles_start = reader.u32()? as usize;

        let mut reader = Reader::at(chunk, header.header_size as usize, WHAT);
        let mut string_offsets = Vec::with_capacity(string_count.min(chunk.len() / 4));
        for _ in 0..string_count {
            string_offsets.push(reader.u32()? as usize);
        }
        let mut style_offsets = Vec::with_capacity(style_count.min(chunk.len() / 4));
        for _ in 0..style_count {
            style_offsets.push(reader.u32()?);
        }

        let utf8 = flags & UTF8_FLAG != 0;
        let strings_end = if style_count > 0 && styles_start > strings_start {
            styles_start
        } else {
            chunk.len()
        };
        let mut strings = Vec::with_capacity(string_offsets.len());
        for offset in string_offsets {
            let at = strings_start + offset;
            if at >= strings_end {
                return Err(Error::malformed(WHAT, header.start + at, "string offset out of range"));
            }
            let (value, len) = if utf8 {
                decode_utf8(&chunk[at..strings_end], header.start + at)?
            } else {
                decode_utf16(&chunk[at..strings_end], header.start + at)?
            };
            strings.push(PoolString {
                value,
                encoded: Some(chunk[at..at + len].to_vec()),
            });
        }

        let style_data = if style_count > 0 && styles_start > 0 && styles_start <= chunk.len() {
            chunk[styles_start..].to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            flags,
            strings,
            style_offsets,
            style_data,
        })
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        let utf8 = self.is_utf8();
        let mut offsets = Vec::with_capacity(self.strings.len());
        let mut data = Vec::new();
        for s in &self.strings {
            offsets.push(data.len() as u32);
            match &s.encoded {
                Some(bytes) => data.extend_from_slice(bytes),
                None if utf8 => encode_utf8(&mut data, &s.value),
                None => encode_utf16(&mut data, &s.value),
            }
        }
        align4(&mut data);

        let index_len = 4 * (self.strings.len() + self.style_offsets.len());
        let strings_start = if self.strings.is_empty() {
            0
        } else {
            STRING_POOL_HEADER_SIZE + index_len
        };
        let styles_start = if self.style_offsets.is_empty() {
            0
        } else {
            STRING_POOL_HEADER_SIZE + index_len + data.len()
        };

        let start = begin_chunk(buf, RES_STRING_POOL_TYPE, STRING_POOL_HEADER_SIZE as u16);
        put_u32(buf, self.strings.len() as u32);
        put_u32(buf, self.style_offsets.len() as u32);
        put_u32(buf, self.flags);
        put_u32(buf, strings_start as u32);
        put_u32(buf, styles_start as u32);
        for offset in offsets {
            put_u32(buf, offset);
        }
        for offset in &self.style_offsets {
            put_u32(buf, *offset);
        }
        buf.extend_from_slice(&data);
        buf.extend_from_slice(&self.style_data);
        align4(buf);
        finish_chunk(buf, start);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }
}

fn decode_utf8(data: &[u8], offset: usize) -> Result<(String, usize)> {
    let mut reader = Reader::new(data, "utf-8 string");
    read_utf8_len(&mut reader)?;
    let byte_len = read_utf8_len(&mut reader)?;
    let bytes = reader
        .bytes(byte_len)
        .map_err(|_| Error::malformed("utf-8 string", offset, "string runs past pool"))?;
    let value = String::from_utf8_lossy(bytes).into_owned();
    // trailing NUL
    let len = (reader.position() + 1).min(data.len());
    Ok((value, len))
}

fn decode_utf16(data: &[u8], offset: usize) -> Result<(String, usize)> {
    let mut reader = Reader::new(data, "utf-16 string");
    let mut len = reader.u16()? as usize;
    if len & 0x8000 != 0 {
        len = ((len & 0x7FFF) << 16) | reader.u16()? as usize;
    }
    let mut units = Vec::with_capacity(len);
    for _ in 0..len {
        units.push(
            reader
                .u16()
                .map_err(|_| Error::malformed("utf-16 string", offset, "string runs past pool"))?,
        );
    }
    let value = String::from_utf16_lossy(&units);
    let len = (reader.position() + 2).min(data.len());
    Ok((value, len))
}

fn read_utf8_len(reader: &mut Reader<'_>) -> Result<usize> {
    let first = reader.u8()? as usize;
    if first & 0x80 != 0 {
        Ok(((first & 0x7F) << 8) | reader.u8()? as usize)
    } else {
        Ok(first)
    }
}

fn put_utf8_len(buf: &mut Vec<u8>, len: usize) {
    if len > 0x7F {
        buf.push((((len >> 8) & 0x7F) | 0x80) as u8);
    }
    buf.push((len & 0xFF) as u8);
}

fn encode_utf8(buf: &mut Vec<u8>, value: &str) {
    put_utf8_len(buf, value.encode_utf16().count());
    put_utf8_len(buf, value.len());
    buf.extend_from_slice(value.as_bytes());
    buf.push(0);
}

fn encode_utf16(buf: &mut Vec<u8>, value: &str) {
    let units: Vec<u16> = value.encode_utf16().collect();
    if units.len() > 0x7FFF {
        put_u16(buf, (((units.len() >> 16) & 0x7FFF) | 0x8000) as u16);
    }
    put_u16(buf, (units.len() & 0xFFFF) as u16);
    for unit in units {
        put_u16(buf, unit);
    }
    put_u16(buf, 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reparse(pool: &StringPool) -> StringPool {
        let bytes = pool.to_bytes();
        let header = ChunkHeader::read(&bytes, 0, "test").unwrap();
        assert_eq!(header.size as usize, bytes.len());
        assert_eq!(bytes.len() % 4, 0);
        StringPool::parse(&bytes, &header).unwrap()
    }

    #[test]
    fn utf8_and_utf16_pools_survive_encoding() {
        for utf8 in [true, false] {
            let pool = StringPool::from_strings(utf8, ["manifest", "", "héllo", "日本"]);
            let parsed = reparse(&pool);
            assert_eq!(parsed.is_utf8(), utf8);
            assert_eq!(
                parsed.iter().collect::<Vec<_>>(),
                ["manifest", "", "héllo", "日本"]
            );
        }
    }

    #[test]
    fn long_strings_use_two_byte_lengths() {
        let long = "x".repeat(300);
        for utf8 in [true, false] {
            let parsed = reparse(&StringPool::from_strings(utf8, [long.clone(), "tail".into()]));
            assert_eq!(parsed.get(0), Some(long.as_str()));
            assert_eq!(parsed.get(1), Some("tail"));
        }
    }

    #[test]
    fn untouched_strings_keep_their_bytes() {
        let original = StringPool::from_strings(true, ["res/drawable/icon.png", "keep"]).to_bytes();
        let header = ChunkHeader::read(&original, 0, "test").unwrap();
        let mut pool = StringPool::parse(&original, &header).unwrap();
        assert_eq!(pool.to_bytes(), original);

        assert!(pool.set(0, "res/a/b.png"));
        let parsed = reparse(&pool);
        assert_eq!(parsed.get(0), Some("res/a/b.png"));
        assert_eq!(parsed.get(1), Some("keep"));
    }

    #[test]
    fn relabel_keeps_layout() {
        let bytes = StringPool::from_strings(false, ["a"]).to_bytes();
        let chunk = RawChunk::relabel(&bytes, RES_TABLE_PACKAGE_TYPE).unwrap();
        let relabeled = chunk.to_bytes();
        assert_eq!(&relabeled[..2], &RES_TABLE_PACKAGE_TYPE.to_le_bytes());
        assert_eq!(&relabeled[2..], &bytes[2..]);
    }
}
