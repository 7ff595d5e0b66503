//! Resource file renaming. The table keeps pointing at the files through the
//! rewritten pool strings, so the app is unaffected while tools that infer a
//! resource's type from its directory or name lose track of it.

use super::{Confuser, Context};
use crate::archive::Compression;
use crate::cycle::{find_candidate, Cycler};
use crate::error::Result;

/// Suffixes that must survive a rename as a whole.
const COMPOUND_EXTENSIONS: &[&str] = &[".9.png"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    /// Replace the directory holding the file.
    Directory,
    /// Replace the file name, keeping its extension.
    FileName,
}

impl PathMode {
    pub fn candidate(self, path: &str, token: &str) -> Option<String> {
        let (parent, leaf) = path.rsplit_once('/')?;
        Some(match self {
            PathMode::Directory => match parent.rsplit_once('/') {
                Some((grandparent, _)) => format!("{grandparent}/{token}/{leaf}"),
                None => format!("{token}/{leaf}"),
            },
            PathMode::FileName => format!("{parent}/{token}{}", extension(leaf)),
        })
    }
}

fn extension(leaf: &str) -> &str {
    if let Some(ext) = COMPOUND_EXTENSIONS
        .iter()
        .find(|ext| leaf.len() > ext.len() && leaf.ends_with(*ext))
    {
        return &leaf[leaf.len() - ext.len()..];
    }
    match leaf.rfind('.') {
        Some(0) | None => "",
        Some(i) => &leaf[i..],
    }
}

pub struct PathConfuser {
    mode: PathMode,
    names: Cycler<String>,
}

impl PathConfuser {
    pub fn directory(dictionary: &[String]) -> Result<Self> {
        Ok(Self {
            mode: PathMode::Directory,
            names: Cycler::new(dictionary.to_vec())?,
        })
    }

    pub fn file_name(dictionary: &[String]) -> Result<Self> {
        Ok(Self {
            mode: PathMode::FileName,
            names: Cycler::new(dictionary.to_vec())?,
        })
    }
}

impl Confuser for PathConfuser {
    fn tag(&self) -> &'static str {
        match self.mode {
            PathMode::Directory => "directory",
            PathMode::FileName => "filename",
        }
    }

    fn confuse(&mut self, cx: &mut Context<'_>) -> Result<()> {
        let log = cx.logger(self.tag());
        let mode = self.mode;
        let mut renamed = 0usize;
        let mut kept = 0usize;

        for file in cx.package.resource_files() {
            if cx.is_keep_type(&file.type_name) || mode.candidate(&file.path, "").is_none() {
                continue;
            }

            let found = find_candidate(
                &mut self.names,
                |token| mode.candidate(&file.path, token).unwrap_or_default(),
                |candidate| !cx.contains_path(candidate),
            );
            let Some(new_path) = found else {
                log.debug(format_args!("no free name left for {}", file.path));
                kept += 1;
                continue;
            };

            cx.package.set_resource_path(&file, &new_path)?;
            if file.compression == Compression::Stored {
                cx.package.rename_uncompressed(&file.path, &new_path);
            }
            cx.register_path_change(&file.path, &new_path);
            log.debug(format_args!("{} -> {}", file.path, new_path));
            renamed += 1;
        }

        log.info(format_args!(
            "Renamed {renamed} resource files, {kept} left in place"
        ));
        Ok(())
    }
}
