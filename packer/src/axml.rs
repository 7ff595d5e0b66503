//! Binary XML documents (`AndroidManifest.xml` inside a package).
//!
//! The document is kept as the flat chunk sequence found on disk, so chunks
//! can be inserted anywhere, including ones a well-formed document would never
//! contain. Sizes are recomputed by [`XmlDocument::to_bytes`].

use crate::chunk::{
    begin_chunk, finish_chunk, put_u16, put_u32, ChunkHeader, RawChunk, Reader, StringPool,
    NO_ENTRY, RES_STRING_POOL_TYPE, RES_XML_CDATA_TYPE, RES_XML_END_ELEMENT_TYPE,
    RES_XML_END_NAMESPACE_TYPE, RES_XML_RESOURCE_MAP_TYPE, RES_XML_START_ELEMENT_TYPE,
    RES_XML_START_NAMESPACE_TYPE, RES_XML_TYPE,
};
use crate::error::{Error, Result};

const NODE_HEADER_SIZE: u16 = 16;
pub const ATTRIBUTE_SIZE: u16 = 20;
const ATTR_EXT_SIZE: u16 = 20;

pub const TYPE_STRING: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub line: u32,
    pub comment: u32,
}

impl Default for NodeInfo {
    fn default() -> Self {
        Self {
            line: 0,
            comment: NO_ENTRY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Namespace {
    pub node: NodeInfo,
    pub prefix: u32,
    pub uri: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedValue {
    pub data_type: u8,
    pub data: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    pub ns: u32,
    pub name: u32,
    pub raw_value: u32,
    pub value: TypedValue,
}

impl Attribute {
    /// An attribute without namespace whose value is the string at `value`.
    pub fn string(name: u32, value: u32) -> Self {
        Self {
            ns: NO_ENTRY,
            name,
            raw_value: value,
            value: TypedValue {
                data_type: TYPE_STRING,
                data: value,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartElement {
    pub node: NodeInfo,
    pub ns: u32,
    pub name: u32,
    pub attribute_start: u16,
    /// Stride between attribute records; anything past 20 bytes is padding.
    pub attribute_size: u16,
    pub id_index: u16,
    pub class_index: u16,
    pub style_index: u16,
    pub attributes: Vec<Attribute>,
}

impl StartElement {
    pub fn new(ns: u32, name: u32) -> Self {
        Self {
            node: NodeInfo::default(),
            ns,
            name,
            attribute_start: ATTR_EXT_SIZE,
            attribute_size: ATTRIBUTE_SIZE,
            id_index: 0,
            class_index: 0,
            style_index: 0,
            attributes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndElement {
    pub node: NodeInfo,
    pub ns: u32,
    pub name: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CData {
    pub node: NodeInfo,
    pub data: u32,
    pub value: TypedValue,
}

#[derive(Debug, Clone)]
pub enum XmlChunk {
    StringPool(StringPool),
    ResourceMap(Vec<u32>),
    StartNamespace(Namespace),
    EndNamespace(Namespace),
    StartElement(StartElement),
    EndElement(EndElement),
    CData(CData),
    Raw(RawChunk),
}

#[derive(Debug, Clone)]
pub struct XmlDocument {
    pub chunks: Vec<XmlChunk>,
}

impl XmlDocument {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let root = ChunkHeader::read(data, 0, "binary xml")?;
        if root.chunk_type != RES_XML_TYPE {
            return Err(Error::malformed(
                "binary xml",
                0,
                format!("unexpected document type {:#06x}", root.chunk_type),
            ));
        }

        let mut chunks = Vec::new();
        let mut offset = root.body_start();
        while offset + 8 <= root.end() {
            let header = ChunkHeader::read(data, offset, "binary xml")?;
            chunks.push(parse_chunk(data, &header)?);
            offset = header.end();
        }
        Ok(Self { chunks })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let start = begin_chunk(&mut buf, RES_XML_TYPE, 8);
        for chunk in &self.chunks {
            write_chunk(&mut buf, chunk);
        }
        finish_chunk(&mut buf, start);
        buf
    }

    pub fn pool(&self) -> Option<&StringPool> {
        self.chunks.iter().find_map(|c| match c {
            XmlChunk::StringPool(pool) => Some(pool),
            _ => None,
        })
    }

    pub fn pool_mut(&mut self) -> Option<&mut StringPool> {
        self.chunks.iter_mut().find_map(|c| match c {
            XmlChunk::StringPool(pool) => Some(pool),
            _ => None,
        })
    }

    pub fn string(&self, index: u32) -> Option<&str> {
        self.pool().and_then(|pool| pool.get(index))
    }

    /// Index of the first chunk after the string pool and resource map.
    pub fn node_start(&self) -> usize {
        self.chunks
            .iter()
            .rposition(|c| matches!(c, XmlChunk::StringPool(_) | XmlChunk::ResourceMap(_)))
            .map_or(0, |i| i + 1)
    }

    pub fn root_element(&self) -> Option<&StartElement> {
        self.elements().next()
    }

    pub fn elements(&self) -> impl Iterator<Item = &StartElement> {
        self.chunks.iter().filter_map(|c| match c {
            XmlChunk::StartElement(e) => Some(e),
            _ => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut StartElement> {
        self.chunks.iter_mut().filter_map(|c| match c {
            XmlChunk::StartElement(e) => Some(e),
            _ => None,
        })
    }
}

fn parse_chunk(data: &[u8], header: &ChunkHeader) -> Result<XmlChunk> {
    const WHAT: &str = "binary xml node";
    let is_node = header.header_size == NODE_HEADER_SIZE;
    let mut reader = Reader::at(data, header.start + 8, WHAT);

    let chunk = match header.chunk_type {
        RES_STRING_POOL_TYPE => XmlChunk::StringPool(StringPool::parse(data, header)?),
        RES_XML_RESOURCE_MAP_TYPE => {
            let mut reader = Reader::at(data, header.body_start(), WHAT);
            let mut ids = Vec::new();
            while reader.position() + 4 <= header.end() {
                ids.push(reader.u32()?);
            }
            XmlChunk::ResourceMap(ids)
        }
        RES_XML_START_NAMESPACE_TYPE | RES_XML_END_NAMESPACE_TYPE if is_node && header.size >= 24 => {
            let node = read_node_info(&mut reader)?;
            let ns = Namespace {
                node,
                prefix: reader.u32()?,
                uri: reader.u32()?,
            };
            if header.chunk_type == RES_XML_START_NAMESPACE_TYPE {
                XmlChunk::StartNamespace(ns)
            } else {
                XmlChunk::EndNamespace(ns)
            }
        }
        RES_XML_START_ELEMENT_TYPE if is_node && header.size >= 36 => {
            XmlChunk::StartElement(read_start_element(data, header)?)
        }
        RES_XML_END_ELEMENT_TYPE if is_node && header.size >= 24 => {
            let node = read_node_info(&mut reader)?;
            XmlChunk::EndElement(EndElement {
                node,
                ns: reader.u32()?,
                name: reader.u32()?,
            })
        }
        RES_XML_CDATA_TYPE if is_node && header.size >= 28 => {
            let node = read_node_info(&mut reader)?;
            let data_index = reader.u32()?;
            XmlChunk::CData(CData {
                node,
                data: data_index,
                value: read_typed_value(&mut reader)?,
            })
        }
        _ => XmlChunk::Raw(RawChunk::from_header(data, header)),
    };
    Ok(chunk)
}

fn read_node_info(reader: &mut Reader<'_>) -> Result<NodeInfo> {
    Ok(NodeInfo {
        line: reader.u32()?,
        comment: reader.u32()?,
    })
}

fn read_typed_value(reader: &mut Reader<'_>) -> Result<TypedValue> {
    let _size = reader.u16()?;
    let _res0 = reader.u8()?;
    Ok(TypedValue {
        data_type: reader.u8()?,
        data: reader.u32()?,
    })
}

fn read_start_element(data: &[u8], header: &ChunkHeader) -> Result<StartElement> {
    const WHAT: &str = "start element";
    let mut reader = Reader::at(data, header.start + 8, WHAT);
    let node = read_node_info(&mut reader)?;
    let ext_start = header.body_start();
    let ns = reader.u32()?;
    let name = reader.u32()?;
    let attribute_start = reader.u16()?;
    let attribute_size = reader.u16()?;
    let attribute_count = reader.u16()?;
    let id_index = reader.u16()?;
    let class_index = reader.u16()?;
    let style_index = reader.u16()?;

    if attribute_size < ATTRIBUTE_SIZE || attribute_start < ATTR_EXT_SIZE {
        return Err(Error::malformed(WHAT, header.start, "attribute layout below 20 bytes"));
    }

    let mut attributes = Vec::with_capacity(attribute_count as usize);
    for i in 0..attribute_count as usize {
        let at = ext_start + attribute_start as usize + i * attribute_size as usize;
        if at + ATTRIBUTE_SIZE as usize > header.end() {
            return Err(Error::malformed(WHAT, at, "attribute runs past element"));
        }
        let mut reader = Reader::at(data, at, WHAT);
        attributes.push(Attribute {
            ns: reader.u32()?,
            name: reader.u32()?,
            raw_value: reader.u32()?,
            value: read_typed_value(&mut reader)?,
        });
    }

    Ok(StartElement {
        node,
        ns,
        name,
        attribute_start,
        attribute_size,
        id_index,
        class_index,
        style_index,
        attributes,
    })
}

fn write_node_info(buf: &mut Vec<u8>, node: &NodeInfo) {
    put_u32(buf, node.line);
    put_u32(buf, node.comment);
}

fn write_typed_value(buf: &mut Vec<u8>, value: &TypedValue) {
    put_u16(buf, 8);
    buf.push(0);
    buf.push(value.data_type);
    put_u32(buf, value.data);
}

fn write_chunk(buf: &mut Vec<u8>, chunk: &XmlChunk) {
    match chunk {
        XmlChunk::StringPool(pool) => pool.write_to(buf),
        XmlChunk::ResourceMap(ids) => {
            let start = begin_chunk(buf, RES_XML_RESOURCE_MAP_TYPE, 8);
            for id in ids {
                put_u32(buf, *id);
            }
            finish_chunk(buf, start);
        }
        XmlChunk::StartNamespace(ns) | XmlChunk::EndNamespace(ns) => {
            let chunk_type = if matches!(chunk, XmlChunk::StartNamespace(_)) {
                RES_XML_START_NAMESPACE_TYPE
            } else {
                RES_XML_END_NAMESPACE_TYPE
            };
            let start = begin_chunk(buf, chunk_type, NODE_HEADER_SIZE);
            write_node_info(buf, &ns.node);
            put_u32(buf, ns.prefix);
            put_u32(buf, ns.uri);
            finish_chunk(buf, start);
        }
        XmlChunk::StartElement(element) => {
            let start = begin_chunk(buf, RES_XML_START_ELEMENT_TYPE, NODE_HEADER_SIZE);
            write_node_info(buf, &element.node);
            let ext_start = buf.len();
            put_u32(buf, element.ns);
            put_u32(buf, element.name);
            put_u16(buf, element.attribute_start);
            put_u16(buf, element.attribute_size);
            put_u16(buf, element.attributes.len() as u16);
            put_u16(buf, element.id_index);
            put_u16(buf, element.class_index);
            put_u16(buf, element.style_index);
            buf.resize(ext_start + element.attribute_start.max(ATTR_EXT_SIZE) as usize, 0);
            for attribute in &element.attributes {
                let record_start = buf.len();
                put_u32(buf, attribute.ns);
                put_u32(buf, attribute.name);
                put_u32(buf, attribute.raw_value);
                write_typed_value(buf, &attribute.value);
                buf.resize(record_start + element.attribute_size.max(ATTRIBUTE_SIZE) as usize, 0);
            }
            finish_chunk(buf, start);
        }
        XmlChunk::EndElement(end) => {
            let start = begin_chunk(buf, RES_XML_END_ELEMENT_TYPE, NODE_HEADER_SIZE);
            write_node_info(buf, &end.node);
            put_u32(buf, end.ns);
            put_u32(buf, end.name);
            finish_chunk(buf, start);
        }
        XmlChunk::CData(cdata) => {
            let start = begin_chunk(buf, RES_XML_CDATA_TYPE, NODE_HEADER_SIZE);
            write_node_info(buf, &cdata.node);
            put_u32(buf, cdata.data);
            write_typed_value(buf, &cdata.value);
            finish_chunk(buf, start);
        }
        XmlChunk::Raw(raw) => raw.write_to(buf),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn parses_fixture_manifest() {
        let doc = XmlDocument::parse(&testutil::manifest_bytes()).unwrap();
        let root = doc.root_element().unwrap();
        assert_eq!(doc.string(root.name), Some("manifest"));
        let tags: Vec<_> = doc.elements().filter_map(|e| doc.string(e.name)).collect();
        assert_eq!(tags, ["manifest", "application"]);
        assert!(matches!(doc.chunks[doc.node_start()], XmlChunk::StartNamespace(_)));
    }

    #[test]
    fn encoding_is_stable() {
        let bytes = testutil::manifest_bytes();
        let doc = XmlDocument::parse(&bytes).unwrap();
        assert_eq!(doc.to_bytes(), bytes);
    }

    #[test]
    fn wide_attribute_records_are_padded_and_read_back() {
        let mut doc = XmlDocument::parse(&testutil::manifest_bytes()).unwrap();
        for element in doc.elements_mut() {
            element.attribute_size = 32;
        }
        let bytes = doc.to_bytes();
        let reparsed = XmlDocument::parse(&bytes).unwrap();
        let root = reparsed.root_element().unwrap();
        assert_eq!(root.attribute_size, 32);
        assert_eq!(root.attributes, doc.root_element().unwrap().attributes);
    }

    #[test]
    fn mislabeled_chunks_stay_raw() {
        let mut doc = XmlDocument::parse(&testutil::manifest_bytes()).unwrap();
        let pool = StringPool::from_strings(true, ["decoy"]).to_bytes();
        let start = doc.node_start();
        doc.chunks.insert(
            start,
            XmlChunk::Raw(RawChunk::relabel(&pool, RES_XML_END_NAMESPACE_TYPE).unwrap()),
        );
        let reparsed = XmlDocument::parse(&doc.to_bytes()).unwrap();
        assert!(matches!(
            &reparsed.chunks[start],
            XmlChunk::Raw(raw) if raw.chunk_type == RES_XML_END_NAMESPACE_TYPE
        ));
        assert_eq!(reparsed.elements().count(), 2);
    }
}
