//! Protection stages. Each stage mutates the shared package in place; the
//! session runs them in the fixed order of [`Stage`].

pub mod dex;
pub mod manifest;
pub mod path;
pub mod table;

use std::collections::BTreeSet;

use rand::RngCore;

use crate::config::ProtectOptions;
use crate::error::Result;
use crate::package::ApkPackage;
use crate::sink::{LogSink, Tagged};

use self::dex::DexConfuser;
use self::manifest::ManifestConfuser;
use self::path::PathConfuser;
use self::table::TableConfuser;

/// Every path currently in the package: archive entries plus the file paths
/// the resource table points at.
#[derive(Debug, Default)]
pub struct PathRegistry {
    paths: BTreeSet<String>,
}

impl PathRegistry {
    pub fn from_package(package: &ApkPackage) -> Self {
        let mut paths: BTreeSet<String> = package.entry_names().map(str::to_string).collect();
        paths.extend(package.resource_files().into_iter().map(|f| f.path));
        Self { paths }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn register_change(&mut self, old: &str, new: &str) {
        self.paths.remove(old);
        self.paths.insert(new.to_string());
    }
}

/// State shared by all stages of one protection run.
pub struct Context<'a> {
    pub package: &'a mut ApkPackage,
    pub options: &'a ProtectOptions,
    pub rng: &'a mut dyn RngCore,
    sink: &'a dyn LogSink,
    registry: Option<PathRegistry>,
}

impl<'a> Context<'a> {
    pub fn new(
        package: &'a mut ApkPackage,
        options: &'a ProtectOptions,
        rng: &'a mut dyn RngCore,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            package,
            options,
            rng,
            sink,
            registry: None,
        }
    }

    pub fn logger(&self, tag: &'static str) -> Tagged<'a> {
        Tagged::new(self.sink, tag)
    }

    fn registry(&mut self) -> &mut PathRegistry {
        let package: &ApkPackage = &*self.package;
        self.registry
            .get_or_insert_with(|| PathRegistry::from_package(package))
    }

    pub fn contains_path(&mut self, path: &str) -> bool {
        self.registry().contains(path)
    }

    pub fn register_path_change(&mut self, old: &str, new: &str) {
        self.registry().register_change(old, new);
    }

    pub fn is_keep_type(&self, type_name: &str) -> bool {
        self.options.keep_types.contains(type_name)
    }
}

pub trait Confuser {
    fn tag(&self) -> &'static str;
    fn confuse(&mut self, cx: &mut Context<'_>) -> Result<()>;
}

pub enum Stage<'c> {
    Manifest(ManifestConfuser),
    Directory(PathConfuser),
    FileName(PathConfuser),
    Table(TableConfuser),
    Dex(DexConfuser<'c>),
}

impl<'c> Stage<'c> {
    /// The resource-side stages, in the order they must run.
    pub fn resource_pipeline(options: &ProtectOptions) -> Result<Vec<Self>> {
        Ok(vec![
            Stage::Manifest(ManifestConfuser),
            Stage::Directory(PathConfuser::directory(&options.dir_dictionary)?),
            Stage::FileName(PathConfuser::file_name(&options.file_dictionary)?),
            Stage::Table(TableConfuser),
        ])
    }
}

impl Confuser for Stage<'_> {
    fn tag(&self) -> &'static str {
        match self {
            Stage::Manifest(c) => c.tag(),
            Stage::Directory(c) | Stage::FileName(c) => c.tag(),
            Stage::Table(c) => c.tag(),
            Stage::Dex(c) => c.tag(),
        }
    }

    fn confuse(&mut self, cx: &mut Context<'_>) -> Result<()> {
        match self {
            Stage::Manifest(c) => c.confuse(cx),
            Stage::Directory(c) | Stage::FileName(c) => c.confuse(cx),
            Stage::Table(c) => c.confuse(cx),
            Stage::Dex(c) => c.confuse(cx),
        }
    }
}
