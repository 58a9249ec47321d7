//! Error diagnostics for cached failures.
//!
//! Re-reads inputs and reports what goes wrong with them, without touching
//! storage or the cache contents.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::cache::ProcessingCache;
use crate::document::DocumentHandle;
use crate::error::{ErrorKind, ExtractionError, Result};
use crate::extract::NfeParser;
use crate::models::input::{Mode, ParserInput};

/// The set of error kinds an input produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ErrorSignature(BTreeSet<ErrorKind>);

impl ErrorSignature {
    pub fn from_errors(errors: &[ExtractionError]) -> Self {
        Self(errors.iter().map(ExtractionError::kind).collect())
    }
}

impl fmt::Display for ErrorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("none");
        }
        let kinds: Vec<String> = self.0.iter().map(ErrorKind::to_string).collect();
        f.write_str(&kinds.join("+"))
    }
}

/// Errors found for one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    pub input: ParserInput,
    pub display_name: String,
    pub errors: Vec<ExtractionError>,
}

impl Diagnosis {
    pub fn signature(&self) -> ErrorSignature {
        ErrorSignature::from_errors(&self.errors)
    }

    /// One flat row per error, for tabular export.
    pub fn rows(&self) -> Vec<DiagnosticRow> {
        self.errors
            .iter()
            .map(|error| DiagnosticRow {
                path: self.input.path.display().to_string(),
                perspective: self.input.perspective.to_string(),
                display_name: self.display_name.clone(),
                kind: error.kind().to_string(),
                error: error.to_string(),
            })
            .collect()
    }
}

/// Flat, serialisable view of one error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticRow {
    pub path: String,
    pub perspective: String,
    pub display_name: String,
    pub kind: String,
    pub error: String,
}

/// Inputs sharing one error signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSummary {
    pub signature: ErrorSignature,
    pub inputs: Vec<ParserInput>,
}

impl ErrorSummary {
    pub fn count(&self) -> usize {
        self.inputs.len()
    }
}

/// Open and extract `input` in `mode`, collecting every error.
pub fn diagnose(input: &ParserInput, mode: Mode) -> Diagnosis {
    let mut handle = DocumentHandle::open(input.clone());
    if !handle.has_errors() {
        NfeParser::new(mode).parse(&mut handle);
    }

    Diagnosis {
        input: input.clone(),
        display_name: handle.display_name().to_string(),
        errors: handle.errors().to_vec(),
    }
}

/// Diagnose every input recorded in the partition `name`.
pub fn diagnose_partition(
    cache: &mut ProcessingCache,
    name: &str,
    mode: Mode,
) -> Result<Vec<Diagnosis>> {
    let inputs = cache.entries(name)?;
    Ok(inputs.iter().map(|input| diagnose(input, mode)).collect())
}

/// Group diagnoses by signature, most frequent first.
pub fn summarize_errors(diagnoses: &[Diagnosis]) -> Vec<ErrorSummary> {
    let mut groups: BTreeMap<ErrorSignature, Vec<ParserInput>> = BTreeMap::new();
    for diagnosis in diagnoses {
        groups
            .entry(diagnosis.signature())
            .or_default()
            .push(diagnosis.input.clone());
    }

    let mut summaries: Vec<ErrorSummary> = groups
        .into_iter()
        .map(|(signature, inputs)| ErrorSummary { signature, inputs })
        .collect();
    summaries.sort_by(|a, b| b.count().cmp(&a.count()));
    summaries
}
