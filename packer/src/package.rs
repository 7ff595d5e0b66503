use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek};
use std::path::Path;

use crate::archive::{read_entries, write_archive, ArchiveEntry, Compression, HeaderInterceptor};
use crate::arsc::ResourceTable;
use crate::axml::XmlDocument;
use crate::config::{provenance_header, PROVENANCE_CHUNK_TYPE};
use crate::error::{Error, Result};

pub const MANIFEST_ENTRY: &str = "AndroidManifest.xml";
pub const TABLE_ENTRY: &str = "resources.arsc";

pub fn is_dex_entry(name: &str) -> bool {
    name.starts_with("classes") && name.ends_with(".dex")
}

pub fn is_native_lib(name: &str) -> bool {
    name.starts_with("lib/") && name.ends_with(".so")
}

/// A file-backed resource: a global pool string naming an archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFile {
    pub pool_index: u32,
    pub path: String,
    pub type_name: String,
    pub compression: Compression,
}

pub struct ApkPackage {
    entries: Vec<ArchiveEntry>,
    manifest: Option<XmlDocument>,
    table: Option<ResourceTable>,
    /// Global pool index -> declaring type, captured at load time so renamed
    /// directories do not change a file's type.
    resource_types: BTreeMap<u32, String>,
    uncompressed: BTreeSet<String>,
}

impl ApkPackage {
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        Self::from_entries(read_entries(reader)?)
    }

    pub fn from_entries(entries: Vec<ArchiveEntry>) -> Result<Self> {
        let find = |name: &str| entries.iter().find(|e| e.name == name);
        let manifest = find(MANIFEST_ENTRY)
            .map(|e| e.contents().and_then(|data| XmlDocument::parse(&data)))
            .transpose()?;
        let table = find(TABLE_ENTRY)
            .map(|e| e.contents().and_then(|data| ResourceTable::parse(&data)))
            .transpose()?;
        let resource_types = table
            .as_ref()
            .map(ResourceTable::string_value_types)
            .unwrap_or_default();
        let uncompressed = entries
            .iter()
            .filter(|e| e.compression() == Compression::Stored)
            .map(|e| e.name.clone())
            .collect();

        Ok(Self {
            entries,
            manifest,
            table,
            resource_types,
            uncompressed,
        })
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    fn entry(&self, name: &str) -> Result<&ArchiveEntry> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::MissingEntry(name.to_string()))
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut ArchiveEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::MissingEntry(name.to_string()))
    }

    pub fn entry_bytes(&self, name: &str) -> Result<Vec<u8>> {
        self.entry(name)?.contents()
    }

    /// Swaps an entry's contents; its name and compression method stay.
    pub fn replace_entry_bytes(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.entry_mut(name)?.set_contents(data)
    }

    pub fn manifest(&self) -> Option<&XmlDocument> {
        self.manifest.as_ref()
    }

    pub fn manifest_mut(&mut self) -> Option<&mut XmlDocument> {
        self.manifest.as_mut()
    }

    pub fn table(&self) -> Option<&ResourceTable> {
        self.table.as_ref()
    }

    pub fn table_mut(&mut self) -> Option<&mut ResourceTable> {
        self.table.as_mut()
    }

    /// Re-encodes the manifest into its entry.
    pub fn refresh_manifest(&mut self) -> Result<()> {
        if let Some(bytes) = self.manifest.as_ref().map(XmlDocument::to_bytes) {
            self.replace_entry_bytes(MANIFEST_ENTRY, &bytes)?;
        }
        Ok(())
    }

    /// Re-encodes the resource table into its entry.
    pub fn finalize_table(&mut self) -> Result<()> {
        if let Some(bytes) = self.table.as_ref().map(ResourceTable::to_bytes) {
            self.replace_entry_bytes(TABLE_ENTRY, &bytes)?;
        }
        Ok(())
    }

    /// Resource files currently present in the archive, by pool index.
    pub fn resource_files(&self) -> Vec<ResourceFile> {
        let Some(pool) = self.table.as_ref().and_then(ResourceTable::global_pool) else {
            return Vec::new();
        };
        self.resource_types
            .iter()
            .filter_map(|(index, type_name)| {
                let path = pool.get(*index)?;
                let entry = self.entries.iter().find(|e| e.name == path)?;
                Some(ResourceFile {
                    pool_index: *index,
                    path: path.to_string(),
                    type_name: type_name.clone(),
                    compression: entry.compression(),
                })
            })
            .collect()
    }

    /// Moves a resource file: renames its entry and rewrites the pool string
    /// that the table uses to find it.
    pub fn set_resource_path(&mut self, file: &ResourceFile, new_path: &str) -> Result<()> {
        self.entry_mut(&file.path)?.name = new_path.to_string();
        if let Some(pool) = self.table.as_mut().and_then(ResourceTable::global_pool_mut) {
            pool.set(file.pool_index, new_path);
        }
        Ok(())
    }

    pub fn uncompressed_files(&self) -> &BTreeSet<String> {
        &self.uncompressed
    }

    pub fn rename_uncompressed(&mut self, old: &str, new: &str) -> bool {
        if self.uncompressed.remove(old) {
            self.uncompressed.insert(new.to_string());
            true
        } else {
            false
        }
    }

    pub fn dex_entries(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| is_dex_entry(&e.name))
            .map(|e| e.name.clone())
            .collect()
    }

    /// Whether the table already carries this tool's provenance chunk.
    pub fn is_protected(&self) -> bool {
        let marker = provenance_header();
        self.table.as_ref().is_some_and(|table| {
            table
                .unknown_chunks()
                .any(|c| c.chunk_type == PROVENANCE_CHUNK_TYPE && c.header.starts_with(&marker))
        })
    }

    /// Brings every entry's storage method in line with the uncompressed registry.
    fn apply_compression_registry(&mut self) -> Result<()> {
        for entry in &mut self.entries {
            let wanted = if self.uncompressed.contains(&entry.name) {
                Compression::Stored
            } else {
                Compression::Deflated
            };
            if entry.compression() != wanted {
                entry.set_compression(wanted)?;
            }
        }
        Ok(())
    }

    /// Writes the package into a scratch file next to `path` and moves it
    /// into place once complete, so `path` never holds a partial archive.
    pub fn write(&mut self, path: &Path, interceptor: &mut dyn HeaderInterceptor) -> Result<()> {
        self.apply_compression_registry()?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut scratch = tempfile::Builder::new()
            .prefix(".apkshield-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        write_archive(BufWriter::new(scratch.as_file_mut()), &self.entries, interceptor)?;
        scratch.persist(path).map_err(|err| Error::Io(err.error))?;
        Ok(())
    }
}
