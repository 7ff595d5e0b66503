//! Package container I/O.
//!
//! Entries are loaded with their compressed bytes intact and written back by
//! a small writer that lets a [`HeaderInterceptor`] touch every local and
//! central directory header before it hits the output.

use std::io::{self, Read, Seek, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::package::is_native_lib;

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;
const LOCAL_HEADER_LEN: usize = 30;
const CENTRAL_HEADER_LEN: usize = 46;

const FLAG_ENCRYPTED: u16 = 1 << 0;
const FLAG_UTF8: u16 = 1 << 11;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;
const DATA_ALIGNMENT: usize = 4;
const PAGE_ALIGNMENT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Stored,
    Deflated,
}

impl Compression {
    fn method(self) -> u16 {
        match self {
            Compression::Stored => METHOD_STORED,
            Compression::Deflated => METHOD_DEFLATED,
        }
    }

    fn version_needed(self) -> u16 {
        match self {
            Compression::Stored => 10,
            Compression::Deflated => 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    compression: Compression,
    crc32: u32,
    size: u64,
    raw: Vec<u8>,
    dos_time: u16,
    dos_date: u16,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, data: &[u8], compression: Compression) -> Result<Self> {
        let mut entry = Self {
            name: name.into(),
            compression,
            crc32: 0,
            size: 0,
            raw: Vec::new(),
            dos_time: 0,
            // 1980-01-01
            dos_date: 0x21,
        };
        entry.set_contents(data)?;
        Ok(entry)
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Returns the uncompressed contents.
    pub fn contents(&self) -> Result<Vec<u8>> {
        match self.compression {
            Compression::Stored => Ok(self.raw.clone()),
            Compression::Deflated => {
                let mut data = Vec::with_capacity(self.size as usize);
                DeflateDecoder::new(self.raw.as_slice()).read_to_end(&mut data)?;
                Ok(data)
            }
        }
    }

    pub fn set_compression(&mut self, compression: Compression) -> Result<()> {
        let data = self.contents()?;
        self.compression = compression;
        self.set_contents(&data)
    }

    /// Replaces the contents, keeping name, compression method and timestamp.
    pub fn set_contents(&mut self, data: &[u8]) -> Result<()> {
        let mut crc = flate2::Crc::new();
        crc.update(data);
        self.crc32 = crc.sum();
        self.size = data.len() as u64;
        self.raw = match self.compression {
            Compression::Stored => data.to_vec(),
            Compression::Deflated => {
                let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data)?;
                encoder.finish()?
            }
        };
        Ok(())
    }
}

/// Reads every entry of a zip archive without decompressing it.
pub fn read_entries<R: Read + Seek>(reader: R) -> Result<Vec<ArchiveEntry>> {
    let mut zip = ZipArchive::new(reader)?;
    let mut entries = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let mut file = zip.by_index_raw(i)?;
        let name = file.name().to_string();
        let compression = match file.compression() {
            zip::CompressionMethod::Stored => Compression::Stored,
            zip::CompressionMethod::Deflated => Compression::Deflated,
            other => {
                return Err(Error::UnsupportedCompression {
                    name,
                    method: format!("{other:?}"),
                })
            }
        };
        let modified = file.last_modified();
        let mut raw = Vec::with_capacity(file.compressed_size() as usize);
        file.read_to_end(&mut raw)?;
        entries.push(ArchiveEntry {
            name,
            compression,
            crc32: file.crc32(),
            size: file.size(),
            raw,
            dos_time: modified.timepart(),
            dos_date: modified.datepart(),
        });
    }
    Ok(entries)
}

/// Mutable view of one header record while it is being written.
pub struct EntryHeader<'a> {
    name: &'a str,
    flags: u16,
}

impl<'a> EntryHeader<'a> {
    pub fn file_name(&self) -> &'a str {
        self.name
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn set_encrypted(&mut self, encrypted: bool) {
        if encrypted {
            self.flags |= FLAG_ENCRYPTED;
        } else {
            self.flags &= !FLAG_ENCRYPTED;
        }
    }
}

/// Hooks run by [`write_archive`]. Local headers are all written before the
/// first central directory header.
pub trait HeaderInterceptor {
    fn on_local_header(&mut self, _header: &mut EntryHeader<'_>) {}
    fn on_central_header(&mut self, _header: &mut EntryHeader<'_>) {}
}

pub struct PassThrough;

impl HeaderInterceptor for PassThrough {}

struct Written {
    flags: u16,
    offset: u32,
}

fn put_u16<W: Write>(out: &mut W, value: u16) -> std::io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

fn put_u32<W: Write>(out: &mut W, value: u32) -> std::io::Result<()> {
    out.write_all(&value.to_le_bytes())
}

/// Stored native libraries are page aligned so the platform can map them
/// straight out of the archive.
fn data_alignment(name: &str) -> usize {
    if is_native_lib(name) {
        PAGE_ALIGNMENT
    } else {
        DATA_ALIGNMENT
    }
}

fn limit<T: TryFrom<u64>>(value: u64, what: &str) -> Result<T> {
    T::try_from(value).map_err(|_| Error::ArchiveLimit(format!("{what} {value} needs zip64")))
}

pub fn write_archive<W: Write>(
    mut out: W,
    entries: &[ArchiveEntry],
    interceptor: &mut dyn HeaderInterceptor,
) -> Result<()> {
    let entry_count: u16 = limit(entries.len() as u64, "entry count")?;
    let mut written = Vec::with_capacity(entries.len());
    let mut offset: u64 = 0;

    for entry in entries {
        let base_flags = if entry.name.is_ascii() { 0 } else { FLAG_UTF8 };
        let mut header = EntryHeader {
            name: &entry.name,
            flags: base_flags,
        };
        interceptor.on_local_header(&mut header);
        let flags = header.flags;

        let name = entry.name.as_bytes();
        let padding = match entry.compression {
            Compression::Stored => {
                let align = data_alignment(&entry.name);
                let data_start = offset as usize + LOCAL_HEADER_LEN + name.len();
                (align - data_start % align) % align
            }
            Compression::Deflated => 0,
        };

        let local_offset: u32 = limit(offset, "entry offset")?;
        put_u32(&mut out, LOCAL_HEADER_SIG)?;
        put_u16(&mut out, entry.compression.version_needed())?;
        put_u16(&mut out, flags)?;
        put_u16(&mut out, entry.compression.method())?;
        put_u16(&mut out, entry.dos_time)?;
        put_u16(&mut out, entry.dos_date)?;
        put_u32(&mut out, entry.crc32)?;
        put_u32(&mut out, limit(entry.raw.len() as u64, "compressed size")?)?;
        put_u32(&mut out, limit(entry.size, "size")?)?;
        put_u16(&mut out, limit(name.len() as u64, "name length")?)?;
        put_u16(&mut out, padding as u16)?;
        out.write_all(name)?;
        io::copy(&mut io::repeat(0).take(padding as u64), &mut out)?;
        out.write_all(&entry.raw)?;

        offset += (LOCAL_HEADER_LEN + name.len() + padding + entry.raw.len()) as u64;
        written.push(Written {
            flags,
            offset: local_offset,
        });
    }

    let central_start: u32 = limit(offset, "central directory offset")?;
    let mut central_size: u64 = 0;
    for (entry, local) in entries.iter().zip(&written) {
        let mut header = EntryHeader {
            name: &entry.name,
            flags: local.flags & !FLAG_ENCRYPTED,
        };
        interceptor.on_central_header(&mut header);

        let name = entry.name.as_bytes();
        put_u32(&mut out, CENTRAL_HEADER_SIG)?;
        put_u16(&mut out, 20)?;
        put_u16(&mut out, entry.compression.version_needed())?;
        put_u16(&mut out, header.flags)?;
        put_u16(&mut out, entry.compression.method())?;
        put_u16(&mut out, entry.dos_time)?;
        put_u16(&mut out, entry.dos_date)?;
        put_u32(&mut out, entry.crc32)?;
        put_u32(&mut out, entry.raw.len() as u32)?;
        put_u32(&mut out, entry.size as u32)?;
        put_u16(&mut out, name.len() as u16)?;
        // extra, comment, disk start, internal attributes
        put_u16(&mut out, 0)?;
        put_u16(&mut out, 0)?;
        put_u16(&mut out, 0)?;
        put_u16(&mut out, 0)?;
        put_u32(&mut out, 0)?;
        put_u32(&mut out, local.offset)?;
        out.write_all(name)?;
        central_size += (CENTRAL_HEADER_LEN + name.len()) as u64;
    }

    put_u32(&mut out, END_OF_CENTRAL_DIR_SIG)?;
    put_u16(&mut out, 0)?;
    put_u16(&mut out, 0)?;
    put_u16(&mut out, entry_count)?;
    put_u16(&mut out, entry_count)?;
    put_u32(&mut out, limit(central_size, "central directory size")?)?;
    put_u32(&mut out, central_start)?;
    put_u16(&mut out, 0)?;
    out.flush()?;
    Ok(())
}
