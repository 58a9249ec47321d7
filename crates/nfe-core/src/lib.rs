//! Core library for NFe (Brazilian electronic invoice) ingestion.
//!
//! This crate provides:
//! - Validated value types for NFe fields (fiscal keys, number lists, decimals, timestamps)
//! - Tolerant XML reading across schema versions and encodings
//! - Fact and product line extraction into validated rows
//! - A durable, self-healing processing cache
//! - Idempotent ingestion into SQLite

pub mod cache;
pub mod diagnose;
pub mod document;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod models;
pub mod store;
pub mod values;
pub mod xml;

pub use cache::{COULD_NOT_READ, FACT_SUCCESS, FULL_SUCCESS, Partition, ProcessingCache};
pub use diagnose::{Diagnosis, ErrorSummary, diagnose_partition, summarize_errors};
pub use document::DocumentHandle;
pub use error::{CacheError, ErrorKind, ExtractionError, NfeError, Result, StoreError};
pub use extract::{DocumentExtractor, Extracted, FactExtractor, LineExtractor, NfeParser};
pub use ingest::{BatchReport, CancelToken, Ingestor, Outcome, list_xml_files};
pub use models::{FactRecord, LineRecord, Mode, NfeConfig, ParserInput, Perspective};
pub use store::{FiscalStore, SqliteStore, table_name};
pub use values::{FiscalKey, NumberList};
