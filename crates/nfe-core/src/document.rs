//! Document reader: opens an NFe file and resolves its header.
//!
//! Opening never fails. Every problem is recorded on the handle's error list
//! and callers inspect [`DocumentHandle::has_errors`] afterwards.

use std::borrow::Cow;
use std::fs;

use tracing::{debug, warn};

use crate::error::{ErrorKind, ExtractionError};
use crate::extract::{DocumentExtractor, FactExtractor, LineExtractor, Source};
use crate::models::input::ParserInput;
use crate::models::record::{FactRecord, LineRecord};
use crate::xml::{self, Element};

/// Display name used when the counterparty cannot be resolved.
pub const PLACEHOLDER_NAME: &str = "ERROR_FETCHING_NAME";

/// Prefix stripped from `infNFe@Id` (`NFe` + key).
const ID_PREFIX_LEN: usize = 3;

/// Prefix stripped from `Reference@URI` (`#NFe` + key).
const URI_PREFIX_LEN: usize = 4;

/// Text encodings tried, in order, when decoding a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Latin1,
}

impl Encoding {
    pub const ALL: [Encoding; 2] = [Encoding::Utf8, Encoding::Latin1];

    /// Decode `bytes`, or `None` when they are not valid in this encoding.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Option<Cow<'a, str>> {
        match self {
            Self::Utf8 => {
                let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
                std::str::from_utf8(bytes).ok().map(Cow::Borrowed)
            }
            // every byte maps to the code point of the same value
            Self::Latin1 => Some(Cow::Owned(bytes.iter().map(|&b| b as char).collect())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Latin1 => "Latin-1",
        }
    }
}

/// An opened document plus everything extracted from it so far.
#[derive(Debug)]
pub struct DocumentHandle {
    input: ParserInput,
    root: Option<Element>,
    display_name: String,
    schema_version: Option<String>,
    fiscal_key: Option<String>,
    errors: Vec<ExtractionError>,
    fact: Option<FactRecord>,
    lines: Option<Vec<LineRecord>>,
}

impl DocumentHandle {
    /// Open the file named by `input` and resolve its header.
    pub fn open(input: ParserInput) -> Self {
        let mut handle = Self::empty(input);

        if let Err(reason) = handle.input.check() {
            handle.errors.push(ExtractionError::Init(reason));
            return handle;
        }

        match fs::read(handle.input.path()) {
            Ok(bytes) => handle.load(&bytes),
            Err(e) => handle.errors.push(ExtractionError::DocumentRead {
                path: handle.input.path.clone(),
                reason: e.to_string(),
            }),
        }

        handle
    }

    /// Build a handle from in-memory document bytes.
    pub fn from_bytes(input: ParserInput, bytes: &[u8]) -> Self {
        let mut handle = Self::empty(input);
        if let Err(reason) = handle.input.check() {
            handle.errors.push(ExtractionError::Init(reason));
            return handle;
        }
        handle.load(bytes);
        handle
    }

    fn empty(input: ParserInput) -> Self {
        Self {
            input,
            root: None,
            display_name: PLACEHOLDER_NAME.to_string(),
            schema_version: None,
            fiscal_key: None,
            errors: Vec::new(),
            fact: None,
            lines: None,
        }
    }

    fn load(&mut self, bytes: &[u8]) {
        let mut failures = Vec::new();

        for encoding in Encoding::ALL {
            let Some(text) = encoding.decode(bytes) else {
                failures.push(format!("not valid {}", encoding.label()));
                continue;
            };
            match xml::parse(&text) {
                Ok(root) => {
                    debug!(
                        "Parsed {} as {}",
                        self.input.path().display(),
                        encoding.label()
                    );
                    self.root = Some(root);
                    break;
                }
                Err(e) => failures.push(format!("{}: {e}", encoding.label())),
            }
        }

        if self.root.is_none() {
            self.errors.push(ExtractionError::DocumentRead {
                path: self.input.path.clone(),
                reason: failures.join("; "),
            });
            return;
        }

        self.resolve_name();
        self.resolve_version();
        self.resolve_key();
    }

    fn resolve_name(&mut self) {
        let Some(root) = &self.root else { return };
        let perspective = self.input.perspective;
        let tag = perspective.counterparty_tag();

        let name = root
            .find_first(tag)
            .and_then(|node| node.find_text("xNome"))
            .map(|name| format!("{} {}", perspective.name_prefix(), name));

        match name {
            Some(name) => self.display_name = name,
            None => self.errors.push(ExtractionError::parse(
                format!("{tag}/xNome"),
                "counterparty name not found",
            )),
        }
    }

    fn resolve_version(&mut self) {
        let Some(root) = &self.root else { return };
        self.schema_version = root
            .find_attr_on("infNFe", "versao")
            .or_else(|| root.find_attr("versao"))
            .map(str::to_string);

        if self.schema_version.is_none() {
            debug!("No schema version in {}", self.input.path().display());
        }
    }

    fn resolve_key(&mut self) {
        let Some(root) = &self.root else { return };

        let direct = root.find_text("chNFe").map(str::to_string);
        let from_id = || {
            root.find_attr_on("infNFe", "Id")
                .and_then(|id| id.get(ID_PREFIX_LEN..))
                .filter(|k| !k.is_empty())
                .map(str::to_string)
        };
        let from_uri = || {
            root.find_attr_on("Reference", "URI")
                .and_then(|uri| uri.get(URI_PREFIX_LEN..))
                .filter(|k| !k.is_empty())
                .map(str::to_string)
        };

        self.fiscal_key = direct.or_else(from_id).or_else(from_uri);

        if self.fiscal_key.is_none() {
            self.errors.push(ExtractionError::parse(
                "document key",
                "no chNFe, infNFe@Id or Reference@URI",
            ));
        }
    }

    /// `"PURCHASE <counterparty>"` or `"SALE <counterparty>"`.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn schema_version(&self) -> Option<&str> {
        self.schema_version.as_deref()
    }

    /// The document key as found, before validation.
    pub fn fiscal_key(&self) -> Option<&str> {
        self.fiscal_key.as_deref()
    }

    pub fn errors(&self) -> &[ExtractionError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Whether the document could not even be opened.
    pub fn has_read_errors(&self) -> bool {
        self.errors.iter().any(ExtractionError::is_read_class)
    }

    /// Error kinds recorded so far, deduplicated, in order.
    pub fn error_kinds(&self) -> Vec<ErrorKind> {
        let mut kinds: Vec<ErrorKind> = self.errors.iter().map(ExtractionError::kind).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    /// Run the fact extractor once; later calls return the cached outcome.
    pub fn extract_fact(&mut self, extractor: &FactExtractor) -> Option<&FactRecord> {
        if self.fact.is_none() && !self.has_errors() {
            self.fact = self.run(extractor);
        }
        self.fact.as_ref()
    }

    /// Run the line extractor once; later calls return the cached outcome.
    pub fn extract_lines(&mut self, extractor: &LineExtractor) -> Option<&[LineRecord]> {
        if self.lines.is_none() && !self.has_errors() {
            self.lines = self.run(extractor);
        }
        self.lines.as_deref()
    }

    fn run<E: DocumentExtractor>(&mut self, extractor: &E) -> Option<E::Output> {
        let (Some(root), Some(key)) = (self.root.as_ref(), self.fiscal_key.as_deref()) else {
            warn!("Extraction requested on unreadable {}", self.input);
            return None;
        };

        let mut errors = Vec::new();
        let output = extractor.extract(&Source::new(root, key), &mut errors);
        self.errors.extend(errors);

        if self.has_errors() { None } else { output }
    }
}
