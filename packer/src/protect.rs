//! One protection run: load, confuse, write.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tempfile::TempDir;
use zip::ZipArchive;

use crate::archive::{EntryHeader, HeaderInterceptor, PassThrough};
use crate::config::ProtectOptions;
use crate::confuser::dex::DexConfuser;
use crate::confuser::{Confuser, Context, Stage};
use crate::dex::DexCodec;
use crate::error::{Error, Result};
use crate::package::{is_dex_entry, is_native_lib, ApkPackage, MANIFEST_ENTRY, TABLE_ENTRY};
use crate::sink::{LogSink, Tagged};

const TAG: &str = "session";

/// Base split names looked up inside `.apks`/`.xapk` bundles, in order.
const BUNDLE_BASE_NAMES: &[&str] = &["base.apk", "base-master.apk", "splits/base-master.apk"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Protected,
    /// The input already carries the provenance chunk; nothing was written.
    AlreadyProtected,
}

/// Sets the "encrypted" flag on the manifest, the resource table, dex files
/// and native libraries. Readers that honour the flag refuse to extract them;
/// the platform installer ignores it.
#[derive(Debug, Default)]
pub struct EncryptionMarker {
    flagged: BTreeSet<String>,
}

impl EncryptionMarker {
    pub fn should_flag(name: &str) -> bool {
        name == MANIFEST_ENTRY || name == TABLE_ENTRY || is_dex_entry(name) || is_native_lib(name)
    }

    pub fn flagged(&self) -> &BTreeSet<String> {
        &self.flagged
    }
}

impl HeaderInterceptor for EncryptionMarker {
    fn on_local_header(&mut self, header: &mut EntryHeader<'_>) {
        if Self::should_flag(header.file_name()) {
            header.set_encrypted(true);
            self.flagged.insert(header.file_name().to_string());
        }
    }

    fn on_central_header(&mut self, header: &mut EntryHeader<'_>) {
        if self.flagged.contains(header.file_name()) {
            header.set_encrypted(true);
        }
    }
}

/// The package actually opened. Bundles are unpacked into a scratch
/// directory that lives as long as this value.
struct StagedInput {
    path: PathBuf,
    _workdir: Option<TempDir>,
}

fn is_bundle(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("apks") || ext.eq_ignore_ascii_case("xapk"))
}

fn stage_input(input: &Path, log: Tagged<'_>) -> Result<StagedInput> {
    if !is_bundle(input) {
        return Ok(StagedInput {
            path: input.to_path_buf(),
            _workdir: None,
        });
    }

    let mut bundle = ZipArchive::new(BufReader::new(File::open(input)?))?;
    let names: Vec<String> = bundle.file_names().map(str::to_string).collect();
    let base = BUNDLE_BASE_NAMES
        .iter()
        .find(|name| names.iter().any(|n| n == *name))
        .map(|name| name.to_string())
        .or_else(|| {
            names
                .iter()
                .find(|n| !n.contains('/') && n.ends_with(".apk"))
                .cloned()
        })
        .ok_or_else(|| Error::MissingEntry(format!("base apk in {}", input.display())))?;

    let workdir = tempfile::Builder::new().prefix("apkshield-").tempdir()?;
    let path = workdir.path().join("base.apk");
    let mut entry = bundle.by_name(&base)?;
    io::copy(&mut entry, &mut File::create(&path)?)?;
    log.info(format_args!("Using {base} from bundle {}", input.display()));

    Ok(StagedInput {
        path,
        _workdir: Some(workdir),
    })
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

pub struct Protector<'a> {
    options: ProtectOptions,
    sink: &'a dyn LogSink,
    rng: Box<dyn RngCore>,
    dex_codec: Option<&'a dyn DexCodec>,
}

impl<'a> Protector<'a> {
    pub fn new(options: ProtectOptions, sink: &'a dyn LogSink) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            sink,
            rng: Box::new(StdRng::from_entropy()),
            dex_codec: None,
        })
    }

    pub fn with_rng(mut self, rng: impl RngCore + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn with_dex_codec(mut self, codec: &'a dyn DexCodec) -> Self {
        self.dex_codec = Some(codec);
        self
    }

    fn stages(&self, log: Tagged<'_>) -> Result<Vec<Stage<'a>>> {
        let mut stages = Stage::resource_pipeline(&self.options)?;
        match (self.options.dex_level, self.dex_codec) {
            (0, _) => {}
            (level, Some(codec)) => stages.push(Stage::Dex(DexConfuser::new(codec, level))),
            (level, None) => log.warn(format_args!(
                "Dex level {level} requested but no dex codec is available, skipping dex"
            )),
        }
        Ok(stages)
    }

    /// Protects `input` into `output`. Any existing `output` is removed first,
    /// and a failed run leaves none behind. `output` may not name the input.
    pub fn protect(&mut self, input: &Path, output: &Path) -> Result<Outcome> {
        let log = Tagged::new(self.sink, TAG);
        if same_file(input, output) {
            return Err(Error::SameFile(output.to_path_buf()));
        }
        if output.exists() {
            fs::remove_file(output)?;
        }

        let staged = stage_input(input, log)?;
        let mut package = ApkPackage::open(&staged.path)?;
        if package.is_protected() {
            log.warn(format_args!("{} is already protected", input.display()));
            return Ok(Outcome::AlreadyProtected);
        }

        let stages = self.stages(log)?;
        {
            let mut cx = Context::new(&mut package, &self.options, self.rng.as_mut(), self.sink);
            for mut stage in stages {
                log.debug(format_args!("Running {}", stage.tag()));
                stage.confuse(&mut cx)?;
            }
        }
        package.finalize_table()?;

        if self.options.encrypt_entries {
            let mut marker = EncryptionMarker::default();
            package.write(output, &mut marker)?;
            log.info(format_args!("Flagged {} entries as encrypted", marker.flagged().len()));
        } else {
            package.write(output, &mut PassThrough)?;
        }
        log.info(format_args!("Wrote {}", output.display()));
        Ok(Outcome::Protected)
    }
}
