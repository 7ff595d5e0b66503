use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

pub const KEEP_ALL_TYPES: &str = "*";

pub const TOOL_NAME: &str = env!("CARGO_PKG_NAME");
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const TOOL_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Type label of the decoy chunk carrying the provenance marker.
pub const PROVENANCE_CHUNK_TYPE: u16 = 0x0000;
pub const PROVENANCE_HEADER_LEN: usize = 32;
pub const PROVENANCE_BODY_LEN: usize = 128;

fn fixed_len(text: &str, len: usize) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(len, 0);
    bytes
}

/// Tool identity, padded or truncated to [`PROVENANCE_HEADER_LEN`].
pub fn provenance_header() -> Vec<u8> {
    fixed_len(&format!("{TOOL_NAME}/{TOOL_VERSION}"), PROVENANCE_HEADER_LEN)
}

/// Tool description, padded or truncated to [`PROVENANCE_BODY_LEN`].
pub fn provenance_body() -> Vec<u8> {
    fixed_len(&format!("{TOOL_NAME} {TOOL_VERSION}: {TOOL_DESCRIPTION}"), PROVENANCE_BODY_LEN)
}

/// Reserved device names; unpacking them fails on some hosts.
const DEFAULT_DIR_DICTIONARY: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const DEFAULT_FILE_DICTIONARY: &[&str] = &[
    "l", "I", "Il", "lI", "II", "ll", "lIl", "IlI", "O0", "0O", "OO", "O0O", "0O0", "Il1", "lI1",
    "I1l", "l1I",
];

/// Resource types that must keep their names and paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Vec<String>")]
pub struct KeepTypes {
    names: BTreeSet<String>,
}

impl KeepTypes {
    pub fn all() -> Self {
        Self::from(vec![KEEP_ALL_TYPES.to_string()])
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.names.contains(KEEP_ALL_TYPES) || self.names.contains(type_name)
    }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, names: I) {
        self.names.extend(names);
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for KeepTypes {
    fn from(names: Vec<String>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<&'a str> for KeepTypes {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProtectOptions {
    pub keep_types: KeepTypes,
    pub skip_manifest: bool,
    /// Highest dex task threshold that runs; 0 disables dex confusion.
    pub dex_level: u8,
    pub dir_dictionary: Vec<String>,
    pub file_dictionary: Vec<String>,
    /// Flag manifest, table, dex and native libraries as encrypted on write.
    pub encrypt_entries: bool,
}

impl Default for ProtectOptions {
    fn default() -> Self {
        Self {
            keep_types: KeepTypes::default(),
            skip_manifest: false,
            dex_level: 0,
            dir_dictionary: DEFAULT_DIR_DICTIONARY.iter().map(|s| s.to_string()).collect(),
            file_dictionary: DEFAULT_FILE_DICTIONARY.iter().map(|s| s.to_string()).collect(),
            encrypt_entries: true,
        }
    }
}

impl ProtectOptions {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<()> {
        validate_dictionary("directory", &self.dir_dictionary)?;
        validate_dictionary("file name", &self.file_dictionary)?;
        if self.keep_types.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::InvalidOption("keep type names must not be empty".into()));
        }
        Ok(())
    }
}

fn validate_dictionary(kind: &str, tokens: &[String]) -> Result<()> {
    if tokens.is_empty() {
        return Err(Error::EmptyDictionary);
    }
    for token in tokens {
        if token.is_empty() || token.contains('/') || token == "." || token == ".." {
            return Err(Error::InvalidOption(format!(
                "{kind} dictionary token {token:?} is not a valid path segment"
            )));
        }
    }
    Ok(())
}

/// Reads a newline separated dictionary; blank lines and `#` comments are skipped.
pub fn load_dictionary(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    let tokens: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    if tokens.is_empty() {
        return Err(Error::EmptyDictionary);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_keeps_everything() {
        let keep = KeepTypes::all();
        assert!(keep.contains("drawable"));
        assert!(keep.contains("anything"));
        let keep: KeepTypes = ["font"].into_iter().collect();
        assert!(keep.contains("font"));
        assert!(!keep.contains("layout"));
    }

    #[test]
    fn defaults_validate() {
        ProtectOptions::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_dictionaries() {
        let mut options = ProtectOptions::default();
        options.dir_dictionary.clear();
        assert!(matches!(options.validate(), Err(Error::EmptyDictionary)));

        let mut options = ProtectOptions::default();
        options.file_dictionary = vec!["a/b".into()];
        assert!(matches!(options.validate(), Err(Error::InvalidOption(_))));
    }

    #[test]
    fn json_options_fill_missing_fields_with_defaults() {
        let options: ProtectOptions =
            serde_json::from_str(r#"{"keepTypes": ["font"], "dexLevel": 1}"#).unwrap();
        assert!(options.keep_types.contains("font"));
        assert_eq!(options.dex_level, 1);
        assert!(options.encrypt_entries);
        assert_eq!(options.dir_dictionary.len(), DEFAULT_DIR_DICTIONARY.len());
    }

    #[test]
    fn provenance_blobs_have_fixed_length() {
        assert_eq!(provenance_header().len(), PROVENANCE_HEADER_LEN);
        assert_eq!(provenance_body().len(), PROVENANCE_BODY_LEN);
        assert!(provenance_header().starts_with(TOOL_NAME.as_bytes()));
        assert_eq!(fixed_len("abcdef", 4), b"abcd");
    }

    #[test]
    fn dictionary_file_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dict.txt");
        fs::write(&path, "# names\na\n\n  b  \n").unwrap();
        assert_eq!(load_dictionary(&path).unwrap(), ["a", "b"]);
    }
}
