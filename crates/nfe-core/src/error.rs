//! Error types for the nfe-core library.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::input::ParserInput;

/// Main error type for the nfe library.
///
/// Only failures that abort a batch end up here. Per-document problems are
/// [`ExtractionError`]s accumulated on the document handle instead.
#[derive(Error, Debug)]
pub enum NfeError {
    /// Processing cache error.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file enumeration pattern.
    #[error("invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// A raw value failed its format check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {kind} {value:?}: {reason}")]
pub struct ValueError {
    /// Name of the value type that rejected the input.
    pub kind: &'static str,
    /// The offending raw value.
    pub value: String,
    /// Why it was rejected.
    pub reason: String,
}

impl ValueError {
    pub fn new(kind: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while constructing a row record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    /// A schema field had no raw value.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A raw value failed its field's validator.
    #[error("validation failed for {field}: {value:?} ({reason})")]
    Validation {
        field: String,
        value: String,
        reason: String,
    },
}

/// Broad class of an extraction error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    Init,
    Read,
    Parse,
    Validation,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Read => "read",
            Self::Parse => "parse",
            Self::Validation => "validation",
        };
        f.write_str(name)
    }
}

/// Errors accumulated on a document handle during reading and extraction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// The parser input itself is malformed.
    #[error("invalid parser input: {0}")]
    Init(String),

    /// The file could not be read or parsed as XML under any encoding.
    #[error("could not read {path}: {reason}")]
    DocumentRead { path: PathBuf, reason: String },

    /// A required field could not be located in the document.
    #[error("could not locate {field}: {reason}")]
    Parse { field: String, reason: String },

    /// A located value failed its format check.
    #[error("validation failed for {field}: {value:?} ({reason})")]
    Validation {
        field: String,
        value: String,
        reason: String,
    },
}

impl ExtractionError {
    pub fn parse(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Init(_) => ErrorKind::Init,
            Self::DocumentRead { .. } => ErrorKind::Read,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Validation { .. } => ErrorKind::Validation,
        }
    }

    /// Init and read errors cannot be fixed by re-extracting the document.
    pub fn is_read_class(&self) -> bool {
        matches!(self.kind(), ErrorKind::Init | ErrorKind::Read)
    }
}

impl From<RowError> for ExtractionError {
    fn from(err: RowError) -> Self {
        match err {
            RowError::MissingField(field) => Self::Parse {
                field,
                reason: "field missing from row".to_string(),
            },
            RowError::Validation {
                field,
                value,
                reason,
            } => Self::Validation {
                field,
                value,
                reason,
            },
        }
    }
}

/// Errors raised while building an XML element tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XmlError {
    /// The text is not well-formed XML.
    #[error("malformed XML: {0}")]
    Syntax(String),

    /// The document contains no root element.
    #[error("document has no root element")]
    Empty,

    /// An element was opened but never closed.
    #[error("element <{0}> is never closed")]
    Unclosed(String),

    /// A second top-level element follows the root.
    #[error("unexpected second root element <{0}>")]
    MultipleRoots(String),
}

/// Errors related to the durable processing cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Reading or writing a partition file failed.
    #[error("cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A partition file is not valid JSON.
    #[error("cache file {path} is not valid JSON: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A partition file holds an entry that is not a parser input.
    #[error("partition {partition} holds a malformed entry: {entry}")]
    Corrupt { partition: String, entry: String },

    /// The entry is already present in the partition.
    #[error("{input} is already present in partition {partition}")]
    AlreadyPresent {
        partition: String,
        input: ParserInput,
    },

    /// The entry is not present in the partition.
    #[error("{input} is not present in partition {partition}")]
    NotFound {
        partition: String,
        input: ParserInput,
    },

    /// No partition with this name exists.
    #[error("unknown partition: {0}")]
    UnknownPartition(String),
}

/// Errors related to the relational storage backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A display name sanitised down to an empty table name.
    #[error("cannot derive a table name from {0:?}")]
    InvalidTable(String),
}

/// Result type for the nfe library.
pub type Result<T> = std::result::Result<T, NfeError>;
