//! Fixtures shared by the unit tests: a small but well-formed package with a
//! manifest, a resource table, three resource files and a fake dex.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use serde::{Deserialize, Serialize};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::axml::{Attribute, EndElement, Namespace, NodeInfo, StartElement, XmlChunk, XmlDocument};
use crate::chunk::{
    begin_chunk, finish_chunk, put_u16, put_u32, read_u16_at, read_u32_at, RawChunk, StringPool,
    NO_ENTRY, RES_STRING_POOL_TYPE, RES_TABLE_PACKAGE_TYPE, RES_TABLE_TYPE, RES_TABLE_TYPE_TYPE,
};
use crate::dex::{ArrayData, DexClass, DexCodec, DexFile, DexMethod, Instruction};
use crate::error::{Error, Result};
use crate::package::ApkPackage;

pub const ICON_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nnot really an icon";
pub const LAYOUT_BYTES: &[u8] = b"\x03\x00\x08\x00layout";
pub const FONT_BYTES: &[u8] = b"\x00\x01\x00\x00font font font font";
pub const NATIVE_BYTES: &[u8] = b"\x7fELF";

pub const FIXTURE_FILES: [(&str, &str); 3] = [
    ("drawable", "res/drawable/icon.png"),
    ("layout", "res/layout/main.xml"),
    ("font", "res/font/custom.ttf"),
];

const ANDROID_LABEL: u32 = 0x0101_0001;

pub fn manifest_bytes() -> Vec<u8> {
    let pool = StringPool::from_strings(
        false,
        [
            "label",
            "android",
            "http://schemas.android.com/apk/res/android",
            "manifest",
            "package",
            "com.example.app",
            "application",
            "Example",
        ],
    );
    let ns = Namespace {
        node: NodeInfo::default(),
        prefix: 1,
        uri: 2,
    };
    let mut manifest = StartElement::new(NO_ENTRY, 3);
    manifest.attributes.push(Attribute::string(4, 5));
    let mut application = StartElement::new(NO_ENTRY, 6);
    let mut label = Attribute::string(0, 7);
    label.ns = 2;
    application.attributes.push(label);

    let end = |name| {
        XmlChunk::EndElement(EndElement {
            node: NodeInfo::default(),
            ns: NO_ENTRY,
            name,
        })
    };
    XmlDocument {
        chunks: vec![
            XmlChunk::StringPool(pool),
            XmlChunk::ResourceMap(vec![ANDROID_LABEL]),
            XmlChunk::StartNamespace(ns),
            XmlChunk::StartElement(manifest),
            XmlChunk::StartElement(application),
            end(6),
            end(3),
            XmlChunk::EndNamespace(ns),
        ],
    }
    .to_bytes()
}

/// A dense `ResTable_type` chunk whose entries each hold one string value.
pub fn type_chunk(type_id: u8, entries: &[(u32, u32)]) -> RawChunk {
    const CONFIG_SIZE: u32 = 64;
    const ENTRY_LEN: u32 = 16;
    let header_size = 8 + 12 + CONFIG_SIZE;
    let mut header = vec![type_id, 0, 0, 0];
    put_u32(&mut header, entries.len() as u32);
    put_u32(&mut header, header_size + 4 * entries.len() as u32);
    put_u32(&mut header, CONFIG_SIZE);
    header.resize((header_size - 8) as usize, 0);

    let mut body = Vec::new();
    for i in 0..entries.len() as u32 {
        put_u32(&mut body, i * ENTRY_LEN);
    }
    for (key, string) in entries {
        put_u16(&mut body, 8);
        put_u16(&mut body, 0);
        put_u32(&mut body, *key);
        put_u16(&mut body, 8);
        body.push(0);
        body.push(crate::axml::TYPE_STRING);
        put_u32(&mut body, *string);
    }
    RawChunk {
        chunk_type: RES_TABLE_TYPE_TYPE,
        header,
        body,
    }
}

/// A one-package table with a file resource per `(type, path)` pair.
pub fn table_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let global = StringPool::from_strings(true, files.iter().map(|(_, path)| *path));
    let mut type_names: Vec<&str> = Vec::new();
    for (ty, _) in files {
        if !type_names.contains(ty) {
            type_names.push(ty);
        }
    }
    let type_strings = StringPool::from_strings(false, type_names.iter().copied());
    let key_strings = StringPool::from_strings(false, (0..files.len()).map(|i| format!("file{i}")));

    let mut buf = Vec::new();
    let table = begin_chunk(&mut buf, RES_TABLE_TYPE, 12);
    put_u32(&mut buf, 1);
    global.write_to(&mut buf);

    let header_size: u32 = 8 + 4 + 256 + 16 + 4;
    let package = begin_chunk(&mut buf, RES_TABLE_PACKAGE_TYPE, header_size as u16);
    put_u32(&mut buf, 0x7f);
    let mut name: Vec<u16> = "com.example.app".encode_utf16().collect();
    name.resize(128, 0);
    for unit in name {
        put_u16(&mut buf, unit);
    }
    let type_pool = type_strings.to_bytes();
    put_u32(&mut buf, header_size);
    put_u32(&mut buf, type_names.len() as u32);
    put_u32(&mut buf, header_size + type_pool.len() as u32);
    put_u32(&mut buf, files.len() as u32);
    put_u32(&mut buf, 0);
    buf.extend_from_slice(&type_pool);
    key_strings.write_to(&mut buf);
    for (i, (ty, _)) in files.iter().enumerate() {
        let type_id = type_names.iter().position(|t| t == ty).unwrap_or(0) as u8 + 1;
        type_chunk(type_id, &[(i as u32, i as u32)]).write_to(&mut buf);
    }
    finish_chunk(&mut buf, package);
    finish_chunk(&mut buf, table);
    debug_assert_eq!(read_u16_at(&buf, 12), Some(RES_STRING_POOL_TYPE));
    buf
}

// Fake dex: classes of methods, serialized as JSON.

pub const FAKE_DEX_CLASSES: usize = 2;
pub const FAKE_DEX_METHODS_PER_CLASS: usize = 2;
pub const FAKE_DEX_METHODS: usize = FAKE_DEX_CLASSES * FAKE_DEX_METHODS_PER_CLASS;

#[derive(Serialize, Deserialize)]
enum FakeInstruction {
    Op(u8),
    Payload { width: u16, count: u32, data: Vec<u8> },
}

impl From<&Instruction> for FakeInstruction {
    fn from(insn: &Instruction) -> Self {
        match insn {
            Instruction::Op(op) => FakeInstruction::Op(*op),
            Instruction::ArrayData(p) => FakeInstruction::Payload {
                width: p.element_width,
                count: p.element_count,
                data: p.data.clone(),
            },
        }
    }
}

impl From<FakeInstruction> for Instruction {
    fn from(insn: FakeInstruction) -> Self {
        match insn {
            FakeInstruction::Op(op) => Instruction::Op(op),
            FakeInstruction::Payload { width, count, data } => Instruction::ArrayData(ArrayData {
                element_width: width,
                element_count: count,
                data,
            }),
        }
    }
}

pub struct FakeMethod {
    instructions: Vec<Instruction>,
}

impl FakeMethod {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }
}

impl DexMethod for FakeMethod {
    fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    fn instruction(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    fn append_instruction(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }
}

pub struct FakeClass {
    methods: Vec<FakeMethod>,
}

impl DexClass for FakeClass {
    fn method_count(&self) -> usize {
        self.methods.len()
    }

    fn method_mut(&mut self, index: usize) -> &mut dyn DexMethod {
        &mut self.methods[index]
    }
}

pub struct FakeDex {
    classes: Vec<FakeClass>,
}

impl DexFile for FakeDex {
    fn class_count(&self) -> usize {
        self.classes.len()
    }

    fn class_mut(&mut self, index: usize) -> &mut dyn DexClass {
        &mut self.classes[index]
    }

    fn refresh(&mut self) {}

    fn shrink(&mut self) {}

    fn encode(&mut self) -> Result<Vec<u8>> {
        let classes: Vec<Vec<Vec<FakeInstruction>>> = self
            .classes
            .iter()
            .map(|c| {
                c.methods
                    .iter()
                    .map(|m| m.instructions.iter().map(FakeInstruction::from).collect())
                    .collect()
            })
            .collect();
        serde_json::to_vec(&classes).map_err(|e| Error::Dex(e.to_string()))
    }
}

pub struct FakeCodec;

impl DexCodec for FakeCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn DexFile>> {
        let classes = decode_fake_dex(bytes)
            .into_iter()
            .map(|methods| FakeClass {
                methods: methods.into_iter().map(FakeMethod::new).collect(),
            })
            .collect();
        Ok(Box::new(FakeDex { classes }))
    }
}

pub fn decode_fake_dex(bytes: &[u8]) -> Vec<Vec<Vec<Instruction>>> {
    let classes: Vec<Vec<Vec<FakeInstruction>>> =
        serde_json::from_slice(bytes).expect("fake dex is json");
    classes
        .into_iter()
        .map(|c| {
            c.into_iter()
                .map(|m| m.into_iter().map(Instruction::from).collect())
                .collect()
        })
        .collect()
}

pub fn fake_dex_bytes() -> Vec<u8> {
    let method = || vec![FakeInstruction::Op(0x12), FakeInstruction::Op(0x0e)];
    let classes: Vec<Vec<Vec<FakeInstruction>>> = (0..FAKE_DEX_CLASSES)
        .map(|_| (0..FAKE_DEX_METHODS_PER_CLASS).map(|_| method()).collect())
        .collect();
    serde_json::to_vec(&classes).expect("fake dex encodes")
}

fn zip_bytes(entries: &[(&str, &[u8], CompressionMethod)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data, method) in entries {
        zip.start_file(*name, FileOptions::default().compression_method(*method))
            .expect("start entry");
        zip.write_all(data).expect("write entry");
    }
    zip.finish().expect("finish zip").into_inner()
}

pub fn fixture_apk_bytes() -> Vec<u8> {
    let manifest = manifest_bytes();
    let table = table_bytes(&FIXTURE_FILES);
    let dex = fake_dex_bytes();
    zip_bytes(&[
        ("AndroidManifest.xml", &manifest, CompressionMethod::Deflated),
        ("resources.arsc", &table, CompressionMethod::Stored),
        ("classes.dex", &dex, CompressionMethod::Deflated),
        ("res/drawable/icon.png", ICON_BYTES, CompressionMethod::Stored),
        ("res/layout/main.xml", LAYOUT_BYTES, CompressionMethod::Deflated),
        ("res/font/custom.ttf", FONT_BYTES, CompressionMethod::Deflated),
        ("lib/arm64-v8a/libnative.so", NATIVE_BYTES, CompressionMethod::Deflated),
    ])
}

pub fn fixture_package() -> ApkPackage {
    ApkPackage::from_reader(Cursor::new(fixture_apk_bytes())).expect("fixture package loads")
}

/// A package holding only a manifest and the given table.
pub fn package_with_table(table: &[u8]) -> ApkPackage {
    let manifest = manifest_bytes();
    let bytes = zip_bytes(&[
        ("AndroidManifest.xml", &manifest, CompressionMethod::Deflated),
        ("resources.arsc", table, CompressionMethod::Stored),
    ]);
    ApkPackage::from_reader(Cursor::new(bytes)).expect("package loads")
}

#[derive(Debug, Clone, Copy)]
pub struct LocalHeader {
    pub flags: u16,
    pub data_offset: usize,
}

/// Central directory records as `(name, flags, local header offset)`.
fn central_records(bytes: &[u8]) -> Vec<(String, u16, usize)> {
    let eocd = bytes.len() - 22;
    assert_eq!(read_u32_at(bytes, eocd), Some(0x0605_4b50), "no end of central directory");
    let count = read_u16_at(bytes, eocd + 10).unwrap_or(0) as usize;
    let mut at = read_u32_at(bytes, eocd + 16).unwrap_or(0) as usize;

    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        assert_eq!(read_u32_at(bytes, at), Some(0x0201_4b50));
        let flags = read_u16_at(bytes, at + 8).unwrap_or(0);
        let name_len = read_u16_at(bytes, at + 28).unwrap_or(0) as usize;
        let extra_len = read_u16_at(bytes, at + 30).unwrap_or(0) as usize;
        let comment_len = read_u16_at(bytes, at + 32).unwrap_or(0) as usize;
        let local = read_u32_at(bytes, at + 42).unwrap_or(0) as usize;
        let name = String::from_utf8_lossy(&bytes[at + 46..at + 46 + name_len]).into_owned();
        records.push((name, flags, local));
        at += 46 + name_len + extra_len + comment_len;
    }
    records
}

pub fn central_flags(bytes: &[u8]) -> BTreeMap<String, u16> {
    central_records(bytes)
        .into_iter()
        .map(|(name, flags, _)| (name, flags))
        .collect()
}

pub fn local_headers(bytes: &[u8]) -> BTreeMap<String, LocalHeader> {
    central_records(bytes)
        .into_iter()
        .map(|(name, _, at)| {
            assert_eq!(read_u32_at(bytes, at), Some(0x0403_4b50));
            let flags = read_u16_at(bytes, at + 6).unwrap_or(0);
            let name_len = read_u16_at(bytes, at + 26).unwrap_or(0) as usize;
            let extra_len = read_u16_at(bytes, at + 28).unwrap_or(0) as usize;
            let header = LocalHeader {
                flags,
                data_offset: at + 30 + name_len + extra_len,
            };
            (name, header)
        })
        .collect()
}
