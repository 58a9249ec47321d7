//! Field extraction from opened NFe documents.
//!
//! Two extractors share the [`DocumentExtractor`] contract: [`FactExtractor`]
//! builds the per-document summary row and [`LineExtractor`] one row per
//! product line. [`NfeParser`] holds both and runs them according to the
//! processing [`Mode`].

mod fact;
mod lines;

pub use fact::FactExtractor;
pub use lines::LineExtractor;

use crate::document::DocumentHandle;
use crate::error::ExtractionError;
use crate::models::input::Mode;
use crate::models::record::{FactRecord, LineRecord};
use crate::xml::Element;

/// What an extractor sees of a successfully opened document.
#[derive(Debug, Clone, Copy)]
pub struct Source<'a> {
    /// Root of the document tree.
    pub root: &'a Element,
    /// Document key as resolved by the reader, not yet validated.
    pub fiscal_key: &'a str,
}

impl<'a> Source<'a> {
    pub fn new(root: &'a Element, fiscal_key: &'a str) -> Self {
        Self { root, fiscal_key }
    }
}

/// Trait for document extractors.
///
/// Implementations never fail outright: problems are appended to `errors`
/// and `None` is returned when no usable output remains.
pub trait DocumentExtractor {
    /// The records this extractor produces.
    type Output;

    fn extract(&self, source: &Source<'_>, errors: &mut Vec<ExtractionError>)
        -> Option<Self::Output>;
}

/// Records extracted from one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub fact: FactRecord,
    /// Empty in [`Mode::FactOnly`].
    pub lines: Vec<LineRecord>,
}

/// Fact and line extraction combined, driven by mode.
#[derive(Debug, Clone, Default)]
pub struct NfeParser {
    fact: FactExtractor,
    lines: Option<LineExtractor>,
}

impl NfeParser {
    /// Create a parser for the given mode with default settings.
    pub fn new(mode: Mode) -> Self {
        Self {
            fact: FactExtractor::default(),
            lines: match mode {
                Mode::FactOnly => None,
                Mode::Full => Some(LineExtractor),
            },
        }
    }

    /// Replace the fact extractor.
    pub fn with_fact_extractor(mut self, fact: FactExtractor) -> Self {
        self.fact = fact;
        self
    }

    /// Run the extractors this mode needs against an opened handle.
    ///
    /// Returns `None` when the handle ends up with errors; they are left on
    /// the handle for the caller to classify.
    pub fn parse(&self, handle: &mut DocumentHandle) -> Option<Extracted> {
        let fact = handle.extract_fact(&self.fact)?.clone();

        let lines = match &self.lines {
            Some(extractor) => handle.extract_lines(extractor)?.to_vec(),
            None => Vec::new(),
        };

        Some(Extracted { fact, lines })
    }
}
