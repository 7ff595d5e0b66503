use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Malformed {what} at offset {offset:#x}: {reason}")]
    Malformed {
        what: &'static str,
        offset: usize,
        reason: String,
    },

    #[error("Unsupported compression method {method} for entry {name}")]
    UnsupportedCompression { name: String, method: String },

    #[error("Entry not found: {0}")]
    MissingEntry(String),

    #[error("Dictionary must contain at least one token")]
    EmptyDictionary,

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Dex codec failure: {0}")]
    Dex(String),

    #[error("Config parse error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Input and output are the same file: {}", .0.display())]
    SameFile(std::path::PathBuf),

    #[error("Archive exceeds format limits: {0}")]
    ArchiveLimit(String),
}

impl Error {
    pub(crate) fn malformed(what: &'static str, offset: usize, reason: impl Into<String>) -> Self {
        Error::Malformed {
            what,
            offset,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
