//! Manifest confuser.
//!
//! Inserts chunks the platform parser walks past but strict decoders choke
//! on: two string pools relabelled as a package and an end-namespace node, a
//! dangling end tag for the root element, and oversized attribute records
//! with synthetic attributes whose names look like closing tags.

use rand::Rng;

use super::{Confuser, Context};
use crate::axml::{Attribute, EndElement, XmlChunk, XmlDocument, ATTRIBUTE_SIZE};
use crate::chunk::{RawChunk, StringPool, RES_TABLE_PACKAGE_TYPE, RES_XML_END_NAMESPACE_TYPE};
use crate::error::Result;
use crate::sink::Tagged;

pub const TAG: &str = "manifest";

const DECOY_POOL_STRINGS: std::ops::RangeInclusive<usize> = 5..=25;
const DECOY_STRING_LEN: std::ops::RangeInclusive<usize> = 4..=16;
/// Extra attribute record size, in 4-byte steps.
const ATTRIBUTE_PADDING_STEPS: u16 = 8;

pub struct ManifestConfuser;

impl Confuser for ManifestConfuser {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn confuse(&mut self, cx: &mut Context<'_>) -> Result<()> {
        let log = cx.logger(TAG);
        match cx.package.manifest_mut() {
            None => log.warn(format_args!("Package has no manifest")),
            Some(_) if cx.options.skip_manifest => log.info(format_args!("Skipping manifest")),
            Some(doc) => {
                insert_decoy_pools(doc, &mut *cx.rng, log);
                let added = randomize_attributes(doc, &mut *cx.rng);
                insert_dangling_end(doc);
                log.info(format_args!(
                    "Inserted decoy chunks, {added} synthetic attributes"
                ));
            }
        }
        // Lengths are recomputed even when the pass is skipped.
        cx.package.refresh_manifest()
    }
}

fn random_text<R: Rng + ?Sized>(rng: &mut R) -> String {
    let len = rng.gen_range(DECOY_STRING_LEN);
    (0..len).map(|_| rng.gen_range(0x21u8..=0x7e) as char).collect()
}

pub fn decoy_pool<R: Rng + ?Sized>(rng: &mut R) -> StringPool {
    let count = rng.gen_range(DECOY_POOL_STRINGS);
    let utf8 = rng.gen_bool(0.5);
    let strings: Vec<String> = (0..count).map(|_| random_text(&mut *rng)).collect();
    StringPool::from_strings(utf8, strings)
}

fn decoy_chunks<R: Rng + ?Sized>(rng: &mut R) -> Result<[RawChunk; 2]> {
    let bytes = decoy_pool(&mut *rng).to_bytes();
    Ok([
        RawChunk::relabel(&bytes, RES_TABLE_PACKAGE_TYPE)?,
        RawChunk::relabel(&bytes, RES_XML_END_NAMESPACE_TYPE)?,
    ])
}

/// Places the decoys right after the string pool and resource map, ahead of
/// the first real node.
fn insert_decoy_pools<R: Rng + ?Sized>(doc: &mut XmlDocument, rng: &mut R, log: Tagged<'_>) {
    match decoy_chunks(&mut *rng) {
        Ok(chunks) => {
            let start = doc.node_start();
            for chunk in chunks.into_iter().rev() {
                doc.chunks.insert(start, XmlChunk::Raw(chunk));
            }
        }
        Err(err) => log.debug(format_args!("decoy pool dropped: {err}")),
    }
}

/// Grows every attribute record and appends two synthetic attributes per
/// element. The root keeps the standard record size.
fn randomize_attributes<R: Rng + ?Sized>(doc: &mut XmlDocument, rng: &mut R) -> usize {
    let tags: Vec<String> = doc
        .elements()
        .map(|e| doc.string(e.name).unwrap_or_default().to_string())
        .collect();
    let Some(pool) = doc.pool_mut() else {
        return 0;
    };

    let mut synthetic = Vec::with_capacity(tags.len());
    for tag in &tags {
        let token = random_text(&mut *rng);
        let close = pool.push(format!("{token}\"></{tag}>"));
        let reopen = pool.push(format!("</{tag}><{tag} {token}"));
        let first = pool.push(random_text(&mut *rng));
        let second = pool.push(random_text(&mut *rng));
        let size = ATTRIBUTE_SIZE + 4 * rng.gen_range(0..=ATTRIBUTE_PADDING_STEPS);
        synthetic.push((size, [Attribute::string(close, first), Attribute::string(reopen, second)]));
    }

    let mut added = 0;
    for (element, (size, attributes)) in doc.elements_mut().zip(synthetic) {
        element.attribute_size = size;
        element.attributes.extend(attributes);
        added += 2;
    }
    if let Some(root) = doc.elements_mut().next() {
        root.attribute_size = ATTRIBUTE_SIZE;
    }
    added
}

fn insert_dangling_end(doc: &mut XmlDocument) {
    let Some(root) = doc.root_element() else {
        return;
    };
    let end = EndElement {
        node: root.node,
        ns: root.ns,
        name: root.name,
    };
    let start = doc.node_start();
    doc.chunks.insert(start, XmlChunk::EndElement(end));
}
