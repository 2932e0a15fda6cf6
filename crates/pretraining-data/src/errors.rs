use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DataError>;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serde_json error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("malformed record at {}:{line}: {source}", .path.display())]
    Record {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Tokenization(#[from] TokenizationError),

    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] tokenizer::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failure to turn one raw record into token ids. Aborts the batch the
/// record belongs to.
#[derive(Error, Debug)]
pub enum TokenizationError {
    #[error("record {index} has no field '{field}'")]
    MissingField { index: usize, field: String },

    #[error("record {index} field '{field}' is not text")]
    NotText { index: usize, field: String },

    #[error("record {index} could not be encoded: {source}")]
    Encoder {
        index: usize,
        source: tokenizer::Error,
    },

    #[error("record {index} produced {ids} input ids but {mask} attention mask entries")]
    Misaligned { index: usize, ids: usize, mask: usize },

    #[error("{}:{line} is not valid UTF-8", .path.display())]
    InvalidUtf8 { path: PathBuf, line: usize },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid destination '{0}'")]
    InvalidDestination(String),

    #[error("{} is not a dataset directory: {reason}", .path.display())]
    NotADataset { path: PathBuf, reason: String },

    #[error("destination {} overlaps dataset directory {}", .target.display(), .source_dir.display())]
    Overlap { source_dir: PathBuf, target: PathBuf },

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("integrity check failed for {}: expected {expected}, got {actual}", .path.display())]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}
