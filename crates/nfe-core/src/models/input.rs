//! Parser inputs and processing modes.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Which party of the invoice the importer is looking from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    /// The importer bought the goods; documents are named after `dest`.
    Buyer,
    /// The importer sold the goods; documents are named after `emit`.
    Seller,
}

impl Perspective {
    /// Prefix used when building a document's display name.
    pub fn name_prefix(&self) -> &'static str {
        match self {
            Self::Buyer => "PURCHASE",
            Self::Seller => "SALE",
        }
    }

    /// Tag holding the counterparty's name block.
    pub fn counterparty_tag(&self) -> &'static str {
        match self {
            Self::Buyer => "dest",
            Self::Seller => "emit",
        }
    }
}

impl fmt::Display for Perspective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buyer => write!(f, "buyer"),
            Self::Seller => write!(f, "seller"),
        }
    }
}

/// Identity of one processing attempt: a file seen from one perspective.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParserInput {
    pub path: PathBuf,
    pub perspective: Perspective,
}

impl ParserInput {
    pub fn new(path: impl Into<PathBuf>, perspective: Perspective) -> Self {
        Self {
            path: path.into(),
            perspective,
        }
    }

    pub fn buyer(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Perspective::Buyer)
    }

    pub fn seller(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Perspective::Seller)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check the input's shape before any I/O is attempted.
    pub fn check(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("path is empty".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for ParserInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path.display(), self.perspective)
    }
}

/// How much of each document is extracted and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Only the per-document fact row.
    #[default]
    FactOnly,
    /// The fact row plus one row per product line.
    Full,
}

impl Mode {
    /// Name of the cache partition tracking successes in this mode.
    pub fn success_partition(&self) -> &'static str {
        match self {
            Self::FactOnly => crate::cache::FACT_SUCCESS,
            Self::Full => crate::cache::FULL_SUCCESS,
        }
    }
}
